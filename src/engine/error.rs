use chrono::NaiveDate;

use crate::model::{format_day, DayPresence, RoomId};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidInterval {
        from: NaiveDate,
        to: NaiveDate,
    },
    UnknownRoom(RoomId),
    /// Every (room, day) claimed both by the proposal and by a stored booking.
    BookingConflict(Vec<DayPresence>),
    StorageUnavailable(String),
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::BookingConflict(_))
    }

    pub fn collisions(&self) -> &[DayPresence] {
        match self {
            EngineError::BookingConflict(rows) => rows,
            _ => &[],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { from, to } => write!(
                f,
                "invalid interval: from_date {} is after to_date {}",
                format_day(*from),
                format_day(*to)
            ),
            EngineError::UnknownRoom(id) => write!(f, "unknown room: {id}"),
            EngineError::BookingConflict(rows) => {
                write!(f, "booking conflict on {} day(s)", rows.len())?;
                if let Some(first) = rows.first() {
                    write!(f, ", first: {first}")?;
                }
                Ok(())
            }
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => EngineError::StorageUnavailable(msg),
        }
    }
}
