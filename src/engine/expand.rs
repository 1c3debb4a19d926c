use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::*;

use super::EngineError;

/// Expand intervals into one row per room per day.
///
/// Per room, the run covers every day from the earliest endpoint seen for
/// that room to the latest one. Gaps between a room's intervals are filled
/// and nothing is clipped to any caller window: `[01-01, 01-03]` plus
/// `[01-10, 01-12]` yields the twelve days `01-01..=01-12`.
///
/// Rows come out ordered by (room, day).
pub fn expand(intervals: &[Interval]) -> Result<Vec<DayPresence>, EngineError> {
    let mut extents: BTreeMap<RoomId, (NaiveDate, NaiveDate)> = BTreeMap::new();
    for interval in intervals {
        if interval.from_date > interval.to_date {
            return Err(EngineError::InvalidInterval {
                from: interval.from_date,
                to: interval.to_date,
            });
        }
        extents
            .entry(interval.room)
            .and_modify(|(lo, hi)| {
                *lo = (*lo).min(interval.from_date);
                *hi = (*hi).max(interval.to_date);
            })
            .or_insert((interval.from_date, interval.to_date));
    }

    let total: i64 = extents
        .values()
        .map(|(lo, hi)| DateSpan::new(*lo, *hi).days())
        .sum();
    let mut rows = Vec::with_capacity(total as usize);
    for (room, (lo, hi)) in extents {
        rows.extend(
            DateSpan::new(lo, hi)
                .iter_days()
                .map(|day| DayPresence::new(room, day)),
        );
    }
    Ok(rows)
}

/// Every day of `window` for every room: the universe availability is
/// carved out of.
pub fn full_grid(rooms: &[RoomId], window: DateSpan) -> Vec<DayPresence> {
    let mut rows = Vec::with_capacity(rooms.len() * window.days() as usize);
    for &room in rooms {
        rows.extend(window.iter_days().map(|day| DayPresence::new(room, day)));
    }
    rows
}
