//! Per-resource time-slot calendars.
//!
//! A [`ResourceCalendar`] turns a desired start time into a conflict-free
//! reservation by pushing the new slot past every overlapping slot that
//! belongs to a different auction cycle. It knows nothing about auctions,
//! costs or skills; the resource gateways build on top of it.

pub mod entry;
pub mod store;

#[cfg(test)]
mod tests;

pub use entry::{CycleId, ReservationEntry, Timestamp};
pub use store::ResourceCalendar;

/// Current wall-clock time as [`Timestamp`].
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
