//! Storage seams for availability templates and the appointment ledger.
//!
//! Every write to the ledger goes through a [`SlotTransaction`] keyed on
//! `(doctor_id, start_time)`. Implementations guarantee that a transaction
//! either commits its single staged write or leaves no trace, and that two
//! partial unique constraints over active appointments hold at commit time:
//! `(patient_id, doctor_id, start_time)` and `(doctor_id, start_time, seat)`.

pub mod memory;
pub mod supabase;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{Appointment, AvailabilityWindow};

pub use memory::{InMemoryStore, SeedData};
pub use supabase::SupabaseStore;

/// The unit of serialization for capacity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    ActivePatientSlot,
    ActiveSeat,
    WindowStart,
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::ActivePatientSlot => "appointments_active_patient_slot_key",
            Constraint::ActiveSeat => "appointments_active_seat_key",
            Constraint::WindowStart => "appointment_availabilities_template_key",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Constraint::ActivePatientSlot, Constraint::ActiveSeat, Constraint::WindowStart]
            .into_iter()
            .find(|c| c.name() == name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint {} violated", .0.name())]
    UniqueViolation(Constraint),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::UniqueViolation { ref constraint, .. } => match Constraint::from_name(constraint) {
                Some(c) => StoreError::UniqueViolation(c),
                None => StoreError::Backend(err.to_string()),
            },
            ref e if e.is_transient() => StoreError::Unavailable(e.to_string()),
            e => StoreError::Backend(e.to_string()),
        }
    }
}

/// A single write staged inside a slot transaction.
#[derive(Debug, Clone)]
pub enum StagedWrite {
    Insert(Appointment),
    /// Replaces the stored row only if it still carries `expected_version`.
    Update { expected_version: i64, appointment: Appointment },
}

impl StagedWrite {
    pub fn appointment(&self) -> &Appointment {
        match self {
            StagedWrite::Insert(a) => a,
            StagedWrite::Update { appointment, .. } => appointment,
        }
    }
}

/// Read side of the availability templates. Writes belong to schedule management.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn doctor_exists(&self, doctor_id: Uuid) -> Result<bool, StoreError>;

    /// Windows of `doctor_id` that apply on `date` and are flagged available.
    async fn windows_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;
}

#[async_trait]
pub trait AppointmentLedger: Send + Sync {
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError>;

    /// Active appointment counts keyed by start instant, for starts in `[from, to)`.
    async fn active_counts(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<DateTime<Utc>, u32>, StoreError>;

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, StoreError>;

    /// Opens a transaction serializing check-then-write on `key`.
    async fn begin(&self, key: SlotKey) -> Result<Box<dyn SlotTransaction>, StoreError>;
}

/// Dropping a transaction without calling [`SlotTransaction::commit`] discards it.
#[async_trait]
pub trait SlotTransaction: Send {
    fn key(&self) -> SlotKey;

    async fn window(&mut self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError>;

    /// Active appointments occupying this transaction's slot.
    async fn active_at_slot(&mut self) -> Result<Vec<Appointment>, StoreError>;

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    fn stage(&mut self, write: StagedWrite);

    /// Applies the staged write and returns the stored row.
    async fn commit(self: Box<Self>) -> Result<Option<Appointment>, StoreError>;
}

/// Lowest seat in the slot not held by `occupied`.
pub fn lowest_free_seat(occupied: &[Appointment]) -> u32 {
    let mut seats: Vec<u32> = occupied.iter().map(|a| a.seat).collect();
    seats.sort_unstable();
    seats.dedup();
    let mut free = 0;
    for seat in seats {
        if seat != free {
            break;
        }
        free += 1;
    }
    free
}
