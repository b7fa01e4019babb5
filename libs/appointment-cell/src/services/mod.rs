pub mod availability;
pub mod booking;
pub mod slots;

pub use availability::AvailabilityResolver;
pub use booking::BookingTransactor;
pub use slots::{generate_slots, SlotDuration, SlotIter};
