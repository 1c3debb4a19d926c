use chrono::NaiveDate;

use crate::engine;
use crate::model::*;

use super::{Ledger, LedgerError};

impl Ledger {
    pub async fn available_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        room_id: Option<RoomId>,
    ) -> Result<Vec<DayPresence>, LedgerError> {
        Ok(engine::available_days(&self.store, from, to, room_id).await?)
    }

    /// Succeeds if `proposed` could be booked right now. Advisory only: no
    /// gate is taken, so a concurrent booking may still win the room.
    pub async fn check_conflicts(&self, proposed: &[Interval]) -> Result<(), LedgerError> {
        Ok(engine::check_conflicts(&self.store, proposed).await?)
    }

    /// Colliding rows for `proposed`, without failing on a collision.
    pub async fn find_conflicts(&self, proposed: &[Interval]) -> Result<Vec<DayPresence>, LedgerError> {
        Ok(engine::find_conflicts(&self.store, proposed).await?)
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        self.store.rooms().await
    }

    /// Live reservations. A filter on an unknown room is an error rather
    /// than an empty list.
    pub async fn list_reservations(
        &self,
        room_id: Option<RoomId>,
    ) -> Result<Vec<Reservation>, LedgerError> {
        if let Some(id) = room_id
            && !self.store.contains_room(id)
        {
            return Err(LedgerError::RoomNotFound(id));
        }
        Ok(self.store.reservations(room_id).await)
    }
}
