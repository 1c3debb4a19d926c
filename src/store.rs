use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// What the availability engine needs from persistence: the set of rooms and
/// a window query over live (non-deleted) reservations.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError>;

    /// Every live reservation sharing at least one day with `window`,
    /// optionally restricted to one room.
    async fn query_overlapping(
        &self,
        window: DateSpan,
        room_id: Option<RoomId>,
    ) -> Result<Vec<Interval>, StoreError>;
}

pub struct MemoryStore {
    rooms: DashMap<RoomId, SharedRoomState>,
    reservation_to_room: DashMap<Ulid, RoomId>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: RoomId) -> bool {
        self.rooms.contains_key(&id)
    }

    pub fn get_room(&self, id: RoomId) -> Option<SharedRoomState> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    /// Room ids in ascending order.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of every room's shared state, ordered by id. Taken before
    /// awaiting any lock so no map shard is held across an await.
    fn room_states(&self) -> Vec<(RoomId, SharedRoomState)> {
        let mut states: Vec<_> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        states.sort_unstable_by_key(|(id, _)| *id);
        states
    }

    pub async fn rooms(&self) -> Vec<Room> {
        let mut out = Vec::new();
        for (_, rs) in self.room_states() {
            out.push(rs.read().await.room.clone());
        }
        out
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation_room(&self, id: &Ulid) -> Option<RoomId> {
        self.reservation_to_room.get(id).map(|e| *e.value())
    }

    /// Live reservations, by room then start date.
    pub async fn reservations(&self, room_id: Option<RoomId>) -> Vec<Reservation> {
        let states = match room_id {
            Some(id) => self.get_room(id).map(|rs| vec![(id, rs)]).unwrap_or_default(),
            None => self.room_states(),
        };
        let mut out = Vec::new();
        for (_, rs) in states {
            let guard = rs.read().await;
            out.extend(guard.live().cloned());
        }
        out
    }

    // ── Event application ────────────────────────────────────

    /// Fold an event into the store. Room creation is handled here; every
    /// other event needs the target room's write guard, which the caller
    /// already holds or this acquires.
    pub async fn apply(&self, event: &Event) {
        if let Event::RoomCreated { id, kind, price } = event {
            let room = Room { id: *id, kind: *kind, price: *price };
            self.rooms
                .insert(*id, Arc::new(RwLock::new(RoomState::new(room))));
            return;
        }
        if let Some(rs) = self.get_room(event.room_id()) {
            let mut guard = rs.write().await;
            self.apply_to_room(&mut guard, event);
        }
    }

    /// Apply a non-creation event to a room the caller has locked.
    pub fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated { kind, price, .. } => {
                rs.room.kind = *kind;
                rs.room.price = *price;
            }
            Event::ReservationCreated {
                id,
                room_id,
                span,
                holder,
                phone,
            } => {
                rs.insert_reservation(Reservation {
                    id: *id,
                    room_id: *room_id,
                    span: *span,
                    holder: holder.clone(),
                    phone: phone.clone(),
                    deleted: false,
                });
                self.reservation_to_room.insert(*id, *room_id);
            }
            Event::ReservationDeleted { id, .. } => {
                // The id stays indexed: a deleted reservation is still a
                // known record, just not a live one.
                rs.soft_delete(*id);
            }
            Event::RoomCreated { .. } => {}
        }
    }

    /// Events that rebuild the current state from nothing, soft-deleted
    /// reservations included.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for (_, rs) in self.room_states() {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.room.id,
                kind: guard.room.kind,
                price: guard.room.price,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    room_id: r.room_id,
                    span: r.span,
                    holder: r.holder.clone(),
                    phone: r.phone.clone(),
                });
                if r.deleted {
                    events.push(Event::ReservationDeleted {
                        id: r.id,
                        room_id: r.room_id,
                    });
                }
            }
        }
        events
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        Ok(self.room_ids())
    }

    async fn query_overlapping(
        &self,
        window: DateSpan,
        room_id: Option<RoomId>,
    ) -> Result<Vec<Interval>, StoreError> {
        let states = match room_id {
            Some(id) => match self.get_room(id) {
                Some(rs) => vec![(id, rs)],
                None => return Ok(Vec::new()),
            },
            None => self.room_states(),
        };
        let mut out = Vec::new();
        for (_, rs) in states {
            let guard = rs.read().await;
            out.extend(guard.overlapping(&window).map(Reservation::interval));
        }
        Ok(out)
    }
}
