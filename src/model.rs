use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only stored time type.
pub type Ms = i64;

/// Bookings are keyed by ULID; the store hands them out in increasing order.
pub type BookingId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Callers establish `start < end`; the engine does so in
    /// `validate_interval`, before any span is built from client input.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching spans (`self.end == other.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A bookable room. Seeded once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub base_hourly_rate: Decimal,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: String,
    pub user_name: String,
    pub span: Span,
    /// Fixed at creation, never repriced.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn view(&self) -> BookingView {
        BookingView {
            id: self.id,
            room_id: self.room_id.clone(),
            user_name: self.user_name.clone(),
            total_price: self.total_price,
            status: self.status,
        }
    }
}

/// What a create or cancel hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub id: BookingId,
    pub room_id: String,
    pub user_name: String,
    pub total_price: Decimal,
    pub status: BookingStatus,
}

/// Create input. Instants are already parsed; ordering is checked by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: String,
    pub user_name: String,
    pub start: Ms,
    pub end: Ms,
}

/// One row of the usage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomUsage {
    pub room_id: String,
    pub room_name: String,
    pub total_hours: Decimal,
    pub total_revenue: Decimal,
}

/// WAL record format. Flat on purpose: one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomAdded {
        room: Room,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: BookingId,
        status: BookingStatus,
        cancelled_at: Option<Ms>,
    },
}
