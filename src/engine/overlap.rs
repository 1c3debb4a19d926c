use chrono::NaiveDate;

use crate::model::*;
use crate::store::ReservationStore;

use super::EngineError;

pub(crate) fn checked_span(from: NaiveDate, to: NaiveDate) -> Result<DateSpan, EngineError> {
    DateSpan::try_new(from, to).ok_or(EngineError::InvalidInterval { from, to })
}

/// Live bookings whose closed interval shares a day with `[from, to]`.
///
/// The predicate is evaluated by the store (sorted per room, binary-searched),
/// so only candidate rows ever leave it.
pub async fn find_overlapping<S>(
    store: &S,
    from: NaiveDate,
    to: NaiveDate,
    room_id: Option<RoomId>,
) -> Result<Vec<Interval>, EngineError>
where
    S: ReservationStore + ?Sized,
{
    let window = checked_span(from, to)?;
    let hits = store.query_overlapping(window, room_id).await?;
    Ok(hits)
}
