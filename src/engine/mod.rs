//! Availability and conflict detection over day-presence rows.
//!
//! Bookings touching a window are fetched from a [`ReservationStore`],
//! expanded to one (room, day) row per occupied day, and combined with set
//! algebra: difference against the full grid for availability, intersection
//! with a proposal's rows for conflicts.
//!
//! [`ReservationStore`]: crate::store::ReservationStore

mod availability;
mod conflict;
mod error;
mod expand;
mod overlap;

pub use availability::{available_days, subtract_days};
pub use conflict::{check_conflicts, find_conflicts, intersect_days};
pub use error::EngineError;
pub use expand::{expand, full_grid};
pub use overlap::find_overlapping;
