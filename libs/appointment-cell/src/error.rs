use thiserror::Error;

use shared_models::error::AppError;

use crate::store::{Constraint, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Availability slot not found")]
    WindowNotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("This slot is now full. Please pick another one.")]
    SlotFull,

    #[error("You already have an active booking for this slot")]
    DuplicateBooking,

    #[error("Not authorized to modify this appointment")]
    Forbidden,

    #[error("Booking aborted by storage contention: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookingError {
    /// Only contention failures leave the request safe to repeat verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Transient(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(Constraint::ActivePatientSlot) => BookingError::DuplicateBooking,
            // Another booking claimed the same seat between our read and our write.
            StoreError::UniqueViolation(Constraint::ActiveSeat) => {
                BookingError::Transient("slot seat taken concurrently".to_string())
            }
            StoreError::UniqueViolation(Constraint::WindowStart) => {
                BookingError::Validation("Availability template already exists for this start time".to_string())
            }
            StoreError::Conflict(msg) | StoreError::Unavailable(msg) => BookingError::Transient(msg),
            StoreError::Backend(msg) => BookingError::Storage(msg),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let message = err.to_string();
        match err {
            BookingError::Validation(msg) => AppError::ValidationError(msg),
            BookingError::DoctorNotFound
            | BookingError::PatientNotFound
            | BookingError::WindowNotFound
            | BookingError::AppointmentNotFound => AppError::NotFound(message),
            BookingError::SlotFull => AppError::SlotFull(message),
            BookingError::DuplicateBooking => AppError::DuplicateBooking(message),
            BookingError::Forbidden => AppError::Forbidden(message),
            BookingError::Transient(_) => AppError::StorageUnavailable(message),
            BookingError::Storage(_) => AppError::Database(message),
        }
    }
}
