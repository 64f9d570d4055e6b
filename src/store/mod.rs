mod journal;
mod memory;

pub use journal::JournaledStore;
pub use memory::InMemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::model::*;

/// Persistence boundary of the booking engine.
///
/// Implementations must make `insert_booking` reject an id that already
/// exists and make `update_booking_status` a compare-and-swap on the current
/// status. Everything else is plain reads.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError>;

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Seeding only; the engine never writes rooms.
    async fn insert_room(&self, room: Room) -> Result<(), StoreError>;

    /// Strictly increasing for the lifetime of the store, across restarts.
    async fn next_booking_id(&self) -> Result<BookingId, StoreError>;

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    async fn find_booking_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn find_confirmed_bookings(&self, room_id: &str) -> Result<Vec<Booking>, StoreError>;

    /// All bookings, oldest first.
    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    /// Move `id` from `expected` to `new`. Returns the matched count: 0 when
    /// the booking is missing or no longer in `expected`.
    async fn update_booking_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        new: BookingStatus,
        cancelled_at: Option<Ms>,
    ) -> Result<u64, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    DuplicateBooking(BookingId),
    DuplicateRoom(String),
    IdsExhausted,
    Io(String),
    Timeout(Duration),
}

impl StoreError {
    /// Whether the caller may reasonably try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Timeout(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateBooking(id) => write!(f, "duplicate booking id: {id}"),
            StoreError::DuplicateRoom(id) => write!(f, "duplicate room id: {id}"),
            StoreError::IdsExhausted => write!(f, "booking id space exhausted"),
            StoreError::Io(e) => write!(f, "io: {e}"),
            StoreError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
