// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::BookingError;
use crate::models::{weekday_name, AvailabilityResponse, AvailableSlot};
use crate::services::slots::{generate_slots, SlotDuration};
use crate::store::{AppointmentLedger, AvailabilityStore};

pub const MSG_NOT_AVAILABLE: &str = "Doctor not available on this day.";
pub const MSG_ALL_TAKEN: &str = "All available slots are either fully booked or in the past.";
pub const MSG_FETCHED: &str = "Slots fetched successfully";

/// Read-only view of which slots can currently be booked. The result is a
/// snapshot; only the booking transactor's re-check is authoritative.
pub struct AvailabilityResolver {
    windows: Arc<dyn AvailabilityStore>,
    ledger: Arc<dyn AppointmentLedger>,
    slot_duration: SlotDuration,
}

impl AvailabilityResolver {
    pub fn new(
        windows: Arc<dyn AvailabilityStore>,
        ledger: Arc<dyn AppointmentLedger>,
        slot_duration: SlotDuration,
    ) -> Self {
        Self { windows, ledger, slot_duration }
    }

    pub async fn resolve(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityResponse, BookingError> {
        debug!("Resolving availability for doctor {} on {}", doctor_id, date);

        if !self.windows.doctor_exists(doctor_id).await? {
            return Err(BookingError::DoctorNotFound);
        }

        let weekday = weekday_name(date).to_string();
        let windows = self.windows.windows_for_date(doctor_id, date).await?;
        debug!("Found {} availability templates", windows.len());

        if windows.is_empty() {
            return Ok(AvailabilityResponse {
                message: MSG_NOT_AVAILABLE.to_string(),
                weekday,
                slots: vec![],
            });
        }

        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        let booked = self
            .ledger
            .active_counts(doctor_id, day_start, day_start + Duration::days(1))
            .await?;

        let mut slots: Vec<AvailableSlot> = Vec::new();
        for window in &windows {
            let capacity = window.max_concurrent_appointments;
            for slot in generate_slots(window, date, self.slot_duration) {
                if slot.start_time <= now {
                    continue;
                }
                let count = booked.get(&slot.start_time).copied().unwrap_or(0);
                debug!(
                    "Slot {} -> booked {}/{}, bookable: {}",
                    slot.start_time, count, capacity, count < capacity
                );
                if count < capacity {
                    slots.push(slot.into());
                }
            }
        }

        slots.sort_by(|a, b| a.start.cmp(&b.start).then(a.window_ref.cmp(&b.window_ref)));
        debug!("Final count of bookable slots: {}", slots.len());

        let message = if slots.is_empty() { MSG_ALL_TAKEN } else { MSG_FETCHED };
        Ok(AvailabilityResponse {
            message: message.to_string(),
            weekday,
            slots,
        })
    }
}
