use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::debug;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;
use crate::store::ReservationStore;

use super::expand::{expand, full_grid};
use super::overlap::{checked_span, find_overlapping};
use super::EngineError;

/// Free (room, day) rows inside `[from, to]`, for one room or for every room.
///
/// The full rooms × days grid minus the expansion of every booking touching
/// the window. Ordered by (room, day).
pub async fn available_days<S>(
    store: &S,
    from: NaiveDate,
    to: NaiveDate,
    room_id: Option<RoomId>,
) -> Result<Vec<DayPresence>, EngineError>
where
    S: ReservationStore + ?Sized,
{
    let window = checked_span(from, to)?;
    if window.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }

    let mut rooms = store.list_rooms().await?;
    if let Some(id) = room_id {
        if !rooms.contains(&id) {
            return Err(EngineError::UnknownRoom(id));
        }
        rooms = vec![id];
    }
    rooms.sort_unstable();
    rooms.dedup();

    let full = full_grid(&rooms, window);
    let booked = find_overlapping(store, from, to, room_id).await?;
    let occupied = expand(&booked)?;
    debug!(
        rooms = rooms.len(),
        bookings = booked.len(),
        occupied = occupied.len(),
        "availability for {window}"
    );

    if occupied.is_empty() {
        return Ok(full);
    }
    Ok(subtract_days(full, &occupied))
}

/// Rows of `base` whose (room, day) key is absent from `remove`. Set
/// semantics: duplicates in `remove` do not matter. Keeps `base` order.
pub fn subtract_days(base: Vec<DayPresence>, remove: &[DayPresence]) -> Vec<DayPresence> {
    let remove: BTreeSet<DayPresence> = remove.iter().copied().collect();
    base.into_iter().filter(|row| !remove.contains(row)).collect()
}
