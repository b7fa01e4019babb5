// libs/appointment-cell/src/services/slots.rs
use std::iter::FusedIterator;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::BookingError;
use crate::models::{AvailabilityWindow, Slot};

/// Fixed width of every bookable slot. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDuration(Duration);

impl SlotDuration {
    pub fn minutes(minutes: i64) -> Result<Self, BookingError> {
        if minutes <= 0 || minutes > 24 * 60 {
            return Err(BookingError::Validation(format!(
                "Slot duration must be between 1 and 1440 minutes, got {}",
                minutes
            )));
        }
        Ok(Self(Duration::minutes(minutes)))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for SlotDuration {
    fn default() -> Self {
        Self(Duration::minutes(40))
    }
}

/// Lazily walks a window in fixed steps. Restartable: calling
/// [`generate_slots`] again with the same inputs yields the same sequence.
#[derive(Debug, Clone)]
pub struct SlotIter {
    availability_id: Uuid,
    next_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    step: Duration,
}

impl Iterator for SlotIter {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let end = self.next_start + self.step;
        if end > self.window_end {
            return None;
        }
        let slot = Slot {
            availability_id: self.availability_id,
            start_time: self.next_start,
            end_time: end,
        };
        self.next_start = end;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.window_end - self.next_start).num_seconds().max(0);
        let n = (remaining / self.step.num_seconds()) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SlotIter {}

impl FusedIterator for SlotIter {}

/// Splits `window` on `date` into `[start, start + duration)` slots; a
/// trailing remainder shorter than `duration` is dropped.
pub fn generate_slots(window: &AvailabilityWindow, date: NaiveDate, duration: SlotDuration) -> SlotIter {
    SlotIter {
        availability_id: window.id,
        next_start: date.and_time(window.start_time).and_utc(),
        window_end: date.and_time(window.end_time).and_utc(),
        step: duration.as_duration(),
    }
}

/// Whether `[start, end)` is exactly one of the slots `window` yields on the day of `start`.
pub fn is_generated_slot(
    window: &AvailabilityWindow,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration: SlotDuration,
) -> bool {
    if end - start != duration.as_duration() {
        return false;
    }
    let date = start.date_naive();
    window.applies_on(date)
        && generate_slots(window, date, duration)
            .take_while(|slot| slot.start_time <= start)
            .any(|slot| slot.start_time == start && slot.end_time == end)
}
