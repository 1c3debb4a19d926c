use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Room identifiers are small integers handed out by the hotel.
pub type RoomId = u32;

/// Textual form of every date crossing the API boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_day(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKind {
    Single,
    Double,
    Triple,
    Quad,
    #[serde(rename = "VIP")]
    Vip,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Single => "Single",
            RoomKind::Double => "Double",
            RoomKind::Triple => "Triple",
            RoomKind::Quad => "Quad",
            RoomKind::Vip => "VIP",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(RoomKind::Single),
            "double" => Ok(RoomKind::Double),
            "triple" => Ok(RoomKind::Triple),
            "quad" => Ok(RoomKind::Quad),
            "vip" => Ok(RoomKind::Vip),
            _ => Err(format!("unknown room kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub price: u32,
}

/// Closed calendar interval `[from, to]`. Both ends are occupied days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateSpan {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        debug_assert!(from <= to, "DateSpan from must not be after to");
        Self { from, to }
    }

    pub fn try_new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        self.to.signed_duration_since(self.from).num_days() + 1
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }

    /// Closed-interval overlap: sharing a single day counts.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Same predicate as [`DateSpan::overlaps`], phrased as "starts inside,
    /// ends inside, or swallows the window".
    pub fn overlaps_window(&self, window: &DateSpan) -> bool {
        window.contains_day(self.from)
            || window.contains_day(self.to)
            || (self.from <= window.from && self.to >= window.to)
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let n = self.days() as usize;
        self.from.iter_days().take(n)
    }

    /// Smallest span enclosing every input span. `None` for an empty input.
    pub fn bounding<I>(spans: I) -> Option<DateSpan>
    where
        I: IntoIterator<Item = DateSpan>,
    {
        spans.into_iter().reduce(|acc, s| DateSpan {
            from: acc.from.min(s.from),
            to: acc.to.max(s.to),
        })
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", format_day(self.from), format_day(self.to))
    }
}

/// A (room, from, to) triple, either read back from storage or proposed by a
/// caller. Not validated: `from_date > to_date` is representable so the
/// engine can reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub room: RoomId,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

impl Interval {
    pub fn new(room: RoomId, from_date: NaiveDate, to_date: NaiveDate) -> Self {
        Self { room, from_date, to_date }
    }

    pub fn span(&self) -> Option<DateSpan> {
        DateSpan::try_new(self.from_date, self.to_date)
    }
}

/// One room occupied (or free) on one day. Ordered by room, then day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayPresence {
    pub room: RoomId,
    pub date: NaiveDate,
}

impl DayPresence {
    pub fn new(room: RoomId, date: NaiveDate) -> Self {
        Self { room, date }
    }
}

impl fmt::Display for DayPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room {} on {}", self.room, format_day(self.date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: RoomId,
    pub span: DateSpan,
    pub holder: String,
    pub phone: String,
    /// Soft-delete marker. Deleted reservations are kept but never retrieved.
    pub deleted: bool,
}

impl Reservation {
    pub fn interval(&self) -> Interval {
        Interval::new(self.room_id, self.span.from, self.span.to)
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every reservation ever made on this room, sorted by `span.from`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping the list sorted by `span.from`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.from <= reservation.span.from);
        self.reservations.insert(pos, reservation);
    }

    /// Mark a reservation deleted. Returns false if it is unknown or already gone.
    pub fn soft_delete(&mut self, id: Ulid) -> bool {
        match self.reservations.iter_mut().find(|r| r.id == id) {
            Some(r) if !r.deleted => {
                r.deleted = true;
                true
            }
            _ => false,
        }
    }

    pub fn live(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| !r.deleted)
    }

    /// Live reservations sharing at least one day with `window`.
    /// Everything starting after `window.to` is cut off by binary search.
    pub fn overlapping(&self, window: &DateSpan) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.from <= window.to);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| !r.deleted && r.span.to >= window.from)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        kind: RoomKind,
        price: u32,
    },
    RoomUpdated {
        id: RoomId,
        kind: RoomKind,
        price: u32,
    },
    ReservationCreated {
        id: Ulid,
        room_id: RoomId,
        span: DateSpan,
        holder: String,
        phone: String,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::RoomCreated { id, .. } | Event::RoomUpdated { id, .. } => *id,
            Event::ReservationCreated { room_id, .. }
            | Event::ReservationDeleted { room_id, .. } => *room_id,
        }
    }
}
