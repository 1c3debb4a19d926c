use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::RoomId;

#[derive(Debug)]
pub enum LedgerError {
    Engine(EngineError),
    RoomNotFound(RoomId),
    RoomExists(RoomId),
    ReservationNotFound(Ulid),
    ReservationExists(Ulid),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Engine(e) => e.fmt(f),
            LedgerError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            LedgerError::RoomExists(id) => write!(f, "room already exists: {id}"),
            LedgerError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            LedgerError::ReservationExists(id) => write!(f, "reservation already exists: {id}"),
            LedgerError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for LedgerError {
    fn from(e: EngineError) -> Self {
        LedgerError::Engine(e)
    }
}
