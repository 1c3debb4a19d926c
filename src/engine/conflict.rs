use std::collections::BTreeSet;

use tracing::debug;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;
use crate::store::ReservationStore;

use super::expand::expand;
use super::overlap::{checked_span, find_overlapping};
use super::EngineError;

/// Fail with [`EngineError::BookingConflict`] if any proposed booking claims
/// a (room, day) already claimed by a stored one.
pub async fn check_conflicts<S>(store: &S, proposed: &[Interval]) -> Result<(), EngineError>
where
    S: ReservationStore + ?Sized,
{
    let collisions = find_conflicts(store, proposed).await?;
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(EngineError::BookingConflict(collisions))
    }
}

/// Colliding (room, day) rows between `proposed` and stored bookings,
/// ordered by (room, day). Empty means the batch fits.
///
/// Stored bookings are fetched once, over the window bounding the whole
/// batch, for every room.
pub async fn find_conflicts<S>(
    store: &S,
    proposed: &[Interval],
) -> Result<Vec<DayPresence>, EngineError>
where
    S: ReservationStore + ?Sized,
{
    // Validate and bound the batch before expanding it: gap filling makes
    // a room's rows as wide as its batch extent.
    let spans = proposed
        .iter()
        .map(|iv| checked_span(iv.from_date, iv.to_date))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(window) = DateSpan::bounding(spans) else {
        return Ok(Vec::new());
    };
    if window.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("batch spans too many days"));
    }
    let proposed_rows = expand(proposed)?;

    let stored = find_overlapping(store, window.from, window.to, None).await?;
    let existing = expand(&stored)?;
    debug!(
        proposed = proposed_rows.len(),
        existing = existing.len(),
        "conflict check over {window}"
    );
    if existing.is_empty() {
        return Ok(Vec::new());
    }

    Ok(intersect_days(&proposed_rows, &existing))
}

/// Rows whose (room, day) key is present on both sides, deduplicated and
/// ordered by (room, day).
pub fn intersect_days(left: &[DayPresence], right: &[DayPresence]) -> Vec<DayPresence> {
    let left: BTreeSet<DayPresence> = left.iter().copied().collect();
    let right: BTreeSet<DayPresence> = right.iter().copied().collect();
    left.intersection(&right).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    #[test]
    fn intersect_keeps_shared_keys() {
        let left = vec![
            DayPresence::new(1, d("2024-04-01")),
            DayPresence::new(1, d("2024-04-02")),
            DayPresence::new(2, d("2024-04-02")),
        ];
        let right = vec![
            DayPresence::new(1, d("2024-04-02")),
            DayPresence::new(1, d("2024-04-02")),
            DayPresence::new(2, d("2024-04-03")),
        ];
        assert_eq!(intersect_days(&left, &right), vec![DayPresence::new(1, d("2024-04-02"))]);
    }

    #[test]
    fn intersect_with_empty_is_empty() {
        let left = vec![DayPresence::new(1, d("2024-04-01"))];
        assert!(intersect_days(&left, &[]).is_empty());
        assert!(intersect_days(&[], &left).is_empty());
    }
}
