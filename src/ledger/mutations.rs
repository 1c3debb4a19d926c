use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{check_conflicts, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{CONFLICTS_TOTAL, RESERVATIONS_TOTAL};

use super::{Ledger, LedgerError};

/// A reservation as requested by a client, before it is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub room_id: RoomId,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub holder: String,
    pub phone: String,
}

impl NewReservation {
    pub fn interval(&self) -> Interval {
        Interval::new(self.room_id, self.from_date, self.to_date)
    }

    fn validate(&self) -> Result<DateSpan, LedgerError> {
        let span = self.interval().span().ok_or(EngineError::InvalidInterval {
            from: self.from_date,
            to: self.to_date,
        })?;
        if span.days() > MAX_STAY_DAYS {
            return Err(LedgerError::LimitExceeded("stay too long"));
        }
        if self.holder.trim().is_empty() {
            return Err(LedgerError::InvalidInput("holder name is empty"));
        }
        if self.holder.chars().count() > MAX_HOLDER_LEN {
            return Err(LedgerError::LimitExceeded("holder name too long"));
        }
        if self.phone.chars().count() > MAX_PHONE_LEN {
            return Err(LedgerError::LimitExceeded("phone too long"));
        }
        Ok(span)
    }
}

/// Days on which two stays of the same batch claim the same room.
fn overlaps_within_batch(batch: &[(DateSpan, RoomId)]) -> Vec<DayPresence> {
    let mut by_room: BTreeMap<RoomId, Vec<DateSpan>> = BTreeMap::new();
    for &(span, room) in batch {
        by_room.entry(room).or_default().push(span);
    }
    let mut rows = BTreeSet::new();
    for (room, spans) in by_room {
        for (i, a) in spans.iter().enumerate() {
            for b in &spans[i + 1..] {
                if a.overlaps(b) {
                    let shared = DateSpan::new(a.from.max(b.from), a.to.min(b.to));
                    rows.extend(shared.iter_days().map(|day| DayPresence::new(room, day)));
                }
            }
        }
    }
    rows.into_iter().collect()
}

impl Ledger {
    pub async fn create_room(&self, room: Room) -> Result<(), LedgerError> {
        let _catalog = self.catalog_gate.lock().await;
        if self.store.room_count() >= MAX_ROOMS_PER_TENANT {
            return Err(LedgerError::LimitExceeded("too many rooms"));
        }
        if self.store.contains_room(room.id) {
            return Err(LedgerError::RoomExists(room.id));
        }
        let event = Event::RoomCreated {
            id: room.id,
            kind: room.kind,
            price: room.price,
        };
        self.persist(event).await?;
        info!("room {} created ({}, {})", room.id, room.kind, room.price);
        Ok(())
    }

    pub async fn update_room(&self, id: RoomId, kind: RoomKind, price: u32) -> Result<(), LedgerError> {
        let _gate = self.lock_rooms(&[id]).await;
        if !self.store.contains_room(id) {
            return Err(LedgerError::RoomNotFound(id));
        }
        self.persist(Event::RoomUpdated { id, kind, price }).await
    }

    /// Book a batch of stays. All-or-nothing: if any entry is invalid or
    /// collides with a stored booking or with another entry of the batch,
    /// nothing is written.
    ///
    /// The gates of every room in the batch are held from the conflict
    /// check until the last event is applied.
    pub async fn reserve(&self, batch: Vec<NewReservation>) -> Result<Vec<Ulid>, LedgerError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(LedgerError::LimitExceeded("batch too large"));
        }

        let mut checked = Vec::with_capacity(batch.len());
        let mut ids = HashSet::with_capacity(batch.len());
        for r in &batch {
            let span = r.validate()?;
            if !self.store.contains_room(r.room_id) {
                return Err(LedgerError::RoomNotFound(r.room_id));
            }
            if !ids.insert(r.id) || self.store.reservation_room(&r.id).is_some() {
                return Err(LedgerError::ReservationExists(r.id));
            }
            checked.push((span, r.room_id));
        }

        let rooms: Vec<RoomId> = batch.iter().map(|r| r.room_id).collect();
        let _gates = self.lock_rooms(&rooms).await;

        for room in &rooms {
            if let Some(rs) = self.store.get_room(*room)
                && rs.read().await.reservations.len() >= MAX_RESERVATIONS_PER_ROOM
            {
                return Err(LedgerError::LimitExceeded("too many reservations on room"));
            }
        }

        let internal = overlaps_within_batch(&checked);
        if !internal.is_empty() {
            metrics::counter!(CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::BookingConflict(internal).into());
        }

        let intervals: Vec<Interval> = batch.iter().map(NewReservation::interval).collect();
        if let Err(e) = check_conflicts(&self.store, &intervals).await {
            if e.is_conflict() {
                metrics::counter!(CONFLICTS_TOTAL).increment(1);
                debug!("batch of {} rejected: {e}", batch.len());
            }
            return Err(e.into());
        }

        let created: Vec<Ulid> = batch.iter().map(|r| r.id).collect();
        let events = batch
            .into_iter()
            .zip(checked)
            .map(|(r, (span, _))| Event::ReservationCreated {
                id: r.id,
                room_id: r.room_id,
                span,
                holder: r.holder,
                phone: r.phone,
            })
            .collect();
        self.persist_all(events).await?;
        metrics::counter!(RESERVATIONS_TOTAL).increment(created.len() as u64);
        debug!("booked {} reservation(s)", created.len());
        Ok(created)
    }

    /// Soft-delete a reservation. Returns the room it was on.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<RoomId, LedgerError> {
        let room_id = self
            .store
            .reservation_room(&id)
            .ok_or(LedgerError::ReservationNotFound(id))?;
        let _gate = self.lock_rooms(&[room_id]).await;
        let rs = self
            .store
            .get_room(room_id)
            .ok_or(LedgerError::RoomNotFound(room_id))?;
        let mut guard = rs.write().await;
        if !guard.live().any(|r| r.id == id) {
            return Err(LedgerError::ReservationNotFound(id));
        }
        let event = Event::ReservationDeleted { id, room_id };
        self.wal_append(vec![event.clone()]).await?;
        self.store.apply_to_room(&mut guard, &event);
        debug!("reservation {id} on room {room_id} cancelled");
        Ok(room_id)
    }
}
