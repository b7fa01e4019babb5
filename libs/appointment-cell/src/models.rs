// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_APPOINTMENT_TYPE: &str = "OPD";
pub const DEFAULT_REASON: &str = "Routine Checkup";

// ==============================================================================
// AVAILABILITY TEMPLATES
// ==============================================================================

/// A doctor's recurring (or one-off) opening, as stored in `appointment_availabilities`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    /// 0 = Sunday through 6 = Saturday.
    pub day_of_week: Option<i32>,
    pub specific_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_concurrent_appointments: u32,
    pub is_available: bool,
}

impl AvailabilityWindow {
    /// A specific date wins over the weekly day when both are set.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match (self.specific_date, self.day_of_week) {
            (Some(specific), _) => specific == date,
            (None, Some(day)) => day == day_of_week_index(date),
            (None, None) => false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.start_time >= self.end_time {
            return Err("Start time must be before end time".to_string());
        }
        if self.max_concurrent_appointments == 0 {
            return Err("Max concurrent appointments must be at least 1".to_string());
        }
        match (self.day_of_week, self.specific_date) {
            (None, None) => Err("Either day of week or specific date is required".to_string()),
            (Some(day), _) if !(0..=6).contains(&day) => {
                Err("Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Identity used for the one-template-per-start uniqueness rule.
    pub fn template_key(&self) -> (Uuid, Option<i32>, Option<NaiveDate>, NaiveTime) {
        (self.doctor_id, self.day_of_week, self.specific_date, self.start_time)
    }
}

pub fn day_of_week_index(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

// ==============================================================================
// DERIVED SLOTS
// ==============================================================================

/// A fixed-width `[start, end)` unit derived from a window. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub availability_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Slot {
    pub fn display(&self) -> String {
        format!(
            "{} - {}",
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub window_ref: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub display: String,
}

impl From<Slot> for AvailableSlot {
    fn from(slot: Slot) -> Self {
        Self {
            window_ref: slot.availability_id,
            start: slot.start_time,
            end: slot.end_time,
            display: slot.display(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityResponse {
    pub message: String,
    pub weekday: String,
    pub slots: Vec<AvailableSlot>,
}

// ==============================================================================
// APPOINTMENT LEDGER
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Confirmed,
    Pending,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Active statuses count toward slot capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Confirmed | AppointmentStatus::Pending)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub availability_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub appointment_type: String,
    pub reason: Option<String>,
    /// Capacity index held inside the slot while active.
    pub seat: u32,
    pub cancellation_reason: Option<String>,
    /// Bumped on every in-place update; writers compare it before overwriting.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn occupies(&self, doctor_id: Uuid, start_time: DateTime<Utc>) -> bool {
        self.is_active() && self.doctor_id == doctor_id && self.start_time == start_time
    }
}

/// Authenticated identity acting on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Caller {
    pub fn can_access(&self, appointment: &Appointment) -> bool {
        self.is_admin
            || appointment.patient_id == self.user_id
            || appointment.doctor_id == self.user_id
    }
}

// ==============================================================================
// COMMANDS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BookSlotCommand {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub window_ref: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub appointment_type: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RescheduleCommand {
    pub appointment_id: Uuid,
    pub window_ref: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub caller: Caller,
}

#[derive(Debug, Clone)]
pub struct CancelCommand {
    pub appointment_id: Uuid,
    pub reason: Option<String>,
    pub caller: Caller,
}

// ==============================================================================
// REQUEST BODIES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotRequest {
    pub doctor_id: Uuid,
    pub window_ref: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub appointment_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub window_ref: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}
