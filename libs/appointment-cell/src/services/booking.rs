// libs/appointment-cell/src/services/booking.rs
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{BookingConfig, RetryPolicy};

use crate::error::BookingError;
use crate::models::{
    Appointment, AppointmentStatus, AvailabilityWindow, BookSlotCommand, CancelCommand, Caller,
    RescheduleCommand, DEFAULT_APPOINTMENT_TYPE, DEFAULT_REASON,
};
use crate::services::slots::{is_generated_slot, SlotDuration};
use crate::store::{lowest_free_seat, AppointmentLedger, AvailabilityStore, SlotKey, StagedWrite};

/// Owns every write to the appointment ledger. Each write runs its
/// capacity and duplicate checks inside a [`crate::store::SlotTransaction`]
/// on the target slot, and contention failures are retried per [`RetryPolicy`].
pub struct BookingTransactor {
    windows: Arc<dyn AvailabilityStore>,
    ledger: Arc<dyn AppointmentLedger>,
    slot_duration: SlotDuration,
    retry: RetryPolicy,
}

impl BookingTransactor {
    pub fn new(
        windows: Arc<dyn AvailabilityStore>,
        ledger: Arc<dyn AppointmentLedger>,
        slot_duration: SlotDuration,
        retry: RetryPolicy,
    ) -> Self {
        Self { windows, ledger, slot_duration, retry }
    }

    pub fn from_config(
        windows: Arc<dyn AvailabilityStore>,
        ledger: Arc<dyn AppointmentLedger>,
        config: &BookingConfig,
    ) -> Result<Self, BookingError> {
        let slot_duration = SlotDuration::minutes(config.slot_duration_minutes)?;
        Ok(Self::new(windows, ledger, slot_duration, config.retry.clone()))
    }

    pub fn slot_duration(&self) -> SlotDuration {
        self.slot_duration
    }

    pub async fn book_slot(
        &self,
        cmd: BookSlotCommand,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        info!(
            "Booking slot {} for patient {} with doctor {}",
            cmd.start, cmd.patient_id, cmd.doctor_id
        );

        if !self.ledger.patient_exists(cmd.patient_id).await? {
            return Err(BookingError::PatientNotFound);
        }
        if !self.windows.doctor_exists(cmd.doctor_id).await? {
            return Err(BookingError::DoctorNotFound);
        }
        self.validate_times(cmd.start, cmd.end, now)?;

        // Stable across attempts so a commit whose acknowledgement was lost is found again.
        let appointment_id = Uuid::new_v4();
        let cmd = &cmd;
        let appointment = self
            .with_retry("book", move |attempt| self.try_book(cmd, appointment_id, attempt, now))
            .await?;

        info!(
            "Appointment {} booked for patient {} at {} (seat {})",
            appointment.id, appointment.patient_id, appointment.start_time, appointment.seat
        );
        Ok(appointment)
    }

    pub async fn reschedule(
        &self,
        cmd: RescheduleCommand,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        info!("Rescheduling appointment {} to {}", cmd.appointment_id, cmd.start);

        let existing = self
            .ledger
            .appointment(cmd.appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound)?;
        authorize(&cmd.caller, &existing)?;
        ensure_active(&existing)?;
        self.validate_times(cmd.start, cmd.end, now)?;

        let doctor_id = existing.doctor_id;
        let cmd = &cmd;
        let appointment = self
            .with_retry("reschedule", move |_| self.try_reschedule(cmd, doctor_id, now))
            .await?;

        info!(
            "Appointment {} rescheduled to {} (seat {})",
            appointment.id, appointment.start_time, appointment.seat
        );
        Ok(appointment)
    }

    pub async fn cancel(
        &self,
        cmd: CancelCommand,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        info!("Cancelling appointment {}", cmd.appointment_id);

        let existing = self
            .ledger
            .appointment(cmd.appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound)?;
        authorize(&cmd.caller, &existing)?;

        let cmd = &cmd;
        let appointment = self
            .with_retry("cancel", move |_| self.try_cancel(cmd, now))
            .await?;

        info!("Appointment {} cancelled", appointment.id);
        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        caller: &Caller,
    ) -> Result<Appointment, BookingError> {
        let appointment = self
            .ledger
            .appointment(appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound)?;
        authorize(caller, &appointment)?;
        Ok(appointment)
    }

    pub async fn patient_appointments(&self, caller: &Caller) -> Result<Vec<Appointment>, BookingError> {
        debug!("Listing appointments for patient {}", caller.user_id);
        Ok(self.ledger.patient_appointments(caller.user_id).await?)
    }

    async fn try_book(
        &self,
        cmd: &BookSlotCommand,
        appointment_id: Uuid,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        let key = SlotKey { doctor_id: cmd.doctor_id, start_time: cmd.start };
        let mut tx = self.ledger.begin(key).await?;

        if attempt > 1 {
            if let Some(stored) = tx.appointment(appointment_id).await? {
                debug!("Appointment {} was committed by an earlier attempt", appointment_id);
                return Ok(stored);
            }
        }

        let window = tx
            .window(cmd.window_ref)
            .await?
            .ok_or(BookingError::WindowNotFound)?;
        self.check_window(&window, cmd.doctor_id, cmd.start, cmd.end)?;

        let occupied = tx.active_at_slot().await?;
        if occupied.iter().any(|a| a.patient_id == cmd.patient_id) {
            warn!("Patient {} already holds slot {}", cmd.patient_id, cmd.start);
            return Err(BookingError::DuplicateBooking);
        }
        let capacity = window.max_concurrent_appointments;
        if occupied.len() as u32 >= capacity {
            warn!(
                "Slot {} for doctor {} is full ({}/{})",
                cmd.start, cmd.doctor_id, occupied.len(), capacity
            );
            return Err(BookingError::SlotFull);
        }

        tx.stage(StagedWrite::Insert(Appointment {
            id: appointment_id,
            patient_id: cmd.patient_id,
            doctor_id: cmd.doctor_id,
            availability_id: window.id,
            start_time: cmd.start,
            end_time: cmd.end,
            status: AppointmentStatus::Confirmed,
            appointment_type: cmd
                .appointment_type
                .clone()
                .unwrap_or_else(|| DEFAULT_APPOINTMENT_TYPE.to_string()),
            reason: Some(cmd.reason.clone().unwrap_or_else(|| DEFAULT_REASON.to_string())),
            seat: lowest_free_seat(&occupied),
            cancellation_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }));

        committed(tx.commit().await?)
    }

    async fn try_reschedule(
        &self,
        cmd: &RescheduleCommand,
        doctor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        let key = SlotKey { doctor_id, start_time: cmd.start };
        let mut tx = self.ledger.begin(key).await?;

        let current = tx
            .appointment(cmd.appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound)?;
        ensure_active(&current)?;

        let window = tx
            .window(cmd.window_ref)
            .await?
            .ok_or(BookingError::WindowNotFound)?;
        self.check_window(&window, doctor_id, cmd.start, cmd.end)?;

        let others: Vec<Appointment> = tx
            .active_at_slot()
            .await?
            .into_iter()
            .filter(|a| a.id != current.id)
            .collect();
        if others.iter().any(|a| a.patient_id == current.patient_id) {
            return Err(BookingError::DuplicateBooking);
        }
        let capacity = window.max_concurrent_appointments;
        if others.len() as u32 >= capacity {
            warn!("Cannot move appointment {} into full slot {}", current.id, cmd.start);
            return Err(BookingError::SlotFull);
        }

        let keeps_seat = current.occupies(doctor_id, cmd.start)
            && current.seat < capacity
            && others.iter().all(|a| a.seat != current.seat);
        let mut updated = current.clone();
        updated.availability_id = window.id;
        updated.start_time = cmd.start;
        updated.end_time = cmd.end;
        updated.seat = if keeps_seat { current.seat } else { lowest_free_seat(&others) };
        updated.version = current.version + 1;
        updated.updated_at = now;

        tx.stage(StagedWrite::Update {
            expected_version: current.version,
            appointment: updated,
        });
        committed(tx.commit().await?)
    }

    async fn try_cancel(&self, cmd: &CancelCommand, now: DateTime<Utc>) -> Result<Appointment, BookingError> {
        // Re-read each attempt: a concurrent reschedule may have moved the slot.
        let snapshot = self
            .ledger
            .appointment(cmd.appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound)?;
        let key = SlotKey {
            doctor_id: snapshot.doctor_id,
            start_time: snapshot.start_time,
        };
        let mut tx = self.ledger.begin(key).await?;

        let current = tx
            .appointment(cmd.appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound)?;
        ensure_active(&current)?;

        let mut updated = current.clone();
        updated.status = AppointmentStatus::Cancelled;
        updated.cancellation_reason = cmd.reason.clone();
        updated.version = current.version + 1;
        updated.updated_at = now;

        tx.stage(StagedWrite::Update {
            expected_version: current.version,
            appointment: updated,
        });
        committed(tx.commit().await?)
    }

    fn validate_times(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let expected = self.slot_duration.as_duration();
        if end - start != expected {
            return Err(BookingError::Validation(format!(
                "Appointment must last exactly {} minutes",
                expected.num_minutes()
            )));
        }
        if start <= now {
            return Err(BookingError::Validation("Cannot book a slot in the past".to_string()));
        }
        Ok(())
    }

    fn check_window(
        &self,
        window: &AvailabilityWindow,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if window.doctor_id != doctor_id {
            return Err(BookingError::Validation(
                "Availability slot does not belong to this doctor".to_string(),
            ));
        }
        if !window.is_available {
            return Err(BookingError::Validation(
                "This availability slot is no longer open".to_string(),
            ));
        }
        if !is_generated_slot(window, start, end, self.slot_duration) {
            return Err(BookingError::Validation(
                "Requested time does not match a slot of this availability".to_string(),
            ));
        }
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, BookingError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BookingError>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn(attempt).await {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        "{} attempt {}/{} aborted ({}), retrying in {:?}",
                        operation, attempt, self.retry.max_attempts, err, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!("{} gave up after {} attempts: {}", operation, attempt, err);
                    return Err(err);
                }
                result => return result,
            }
        }
    }
}

fn committed(row: Option<Appointment>) -> Result<Appointment, BookingError> {
    row.ok_or_else(|| BookingError::Storage("commit returned no row".to_string()))
}

fn authorize(caller: &Caller, appointment: &Appointment) -> Result<(), BookingError> {
    if caller.can_access(appointment) {
        Ok(())
    } else {
        warn!(
            "User {} denied access to appointment {}",
            caller.user_id, appointment.id
        );
        Err(BookingError::Forbidden)
    }
}

fn ensure_active(appointment: &Appointment) -> Result<(), BookingError> {
    if appointment.is_active() {
        Ok(())
    } else {
        Err(BookingError::Validation(format!(
            "Appointment is already {}",
            appointment.status
        )))
    }
}
