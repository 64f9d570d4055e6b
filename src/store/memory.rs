use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

/// Monotonic ULID source. A fresh ULID is used when it sorts after the last
/// one handed out, otherwise the last one is incremented.
struct IdSequence {
    last: Ulid,
}

impl IdSequence {
    fn next(&mut self) -> Option<Ulid> {
        let fresh = Ulid::new();
        let next = if fresh > self.last {
            fresh
        } else {
            self.last.increment()?
        };
        self.last = next;
        Some(next)
    }

    fn observe(&mut self, id: Ulid) {
        if id > self.last {
            self.last = id;
        }
    }
}

pub struct InMemoryStore {
    rooms: DashMap<String, Room>,
    bookings: DashMap<BookingId, Booking>,
    /// room id → booking ids, in insertion order.
    by_room: DashMap<String, Vec<BookingId>>,
    ids: Mutex<IdSequence>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            bookings: DashMap::new(),
            by_room: DashMap::new(),
            ids: Mutex::new(IdSequence { last: Ulid::nil() }),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    // ── Synchronous primitives (shared with the journaled store) ─────

    pub(super) fn add_room(&self, room: Room) -> Result<(), StoreError> {
        match self.rooms.entry(room.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateRoom(room.id)),
            Entry::Vacant(slot) => {
                slot.insert(room);
                Ok(())
            }
        }
    }

    pub(super) fn remove_room(&self, id: &str) {
        self.rooms.remove(id);
    }

    pub(super) fn add_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let id = booking.id;
        let room_id = booking.room_id.clone();
        match self.bookings.entry(id) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateBooking(id)),
            Entry::Vacant(slot) => {
                slot.insert(booking);
            }
        }
        self.by_room.entry(room_id).or_default().push(id);
        self.lock_ids().observe(id);
        Ok(())
    }

    pub(super) fn remove_booking(&self, id: &BookingId) {
        if let Some((_, booking)) = self.bookings.remove(id)
            && let Some(mut ids) = self.by_room.get_mut(&booking.room_id)
        {
            ids.retain(|b| b != id);
        }
    }

    /// Compare-and-swap on status. Returns the booking as it was before the
    /// swap, or `None` if it is missing or not in `expected`.
    pub(super) fn transition(
        &self,
        id: &BookingId,
        expected: BookingStatus,
        new: BookingStatus,
        cancelled_at: Option<Ms>,
    ) -> Option<Booking> {
        let mut entry = self.bookings.get_mut(id)?;
        if entry.status != expected {
            return None;
        }
        let before = entry.clone();
        entry.status = new;
        entry.cancelled_at = cancelled_at;
        Some(before)
    }

    /// Put back a booking record captured by `transition`.
    pub(super) fn restore(&self, booking: Booking) {
        if let Some(mut entry) = self.bookings.get_mut(&booking.id) {
            *entry = booking;
        }
    }

    /// Apply a replayed log record.
    pub(super) fn apply_event(&self, event: &Event) {
        match event {
            Event::RoomAdded { room } => {
                self.rooms.insert(room.id.clone(), room.clone());
            }
            Event::BookingCreated { booking } => {
                if self.bookings.insert(booking.id, booking.clone()).is_none() {
                    self.by_room
                        .entry(booking.room_id.clone())
                        .or_default()
                        .push(booking.id);
                }
                self.lock_ids().observe(booking.id);
            }
            Event::BookingStatusChanged {
                id,
                status,
                cancelled_at,
            } => {
                if let Some(mut entry) = self.bookings.get_mut(id) {
                    entry.status = *status;
                    entry.cancelled_at = *cancelled_at;
                }
            }
        }
    }

    /// Events that rebuild the current state from nothing.
    pub(super) fn snapshot(&self) -> Vec<Event> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        let mut events: Vec<Event> = rooms.into_iter().map(|room| Event::RoomAdded { room }).collect();
        events.extend(
            self.sorted_bookings()
                .into_iter()
                .map(|booking| Event::BookingCreated { booking }),
        );
        events
    }

    fn sorted_bookings(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id);
        all
    }

    fn lock_ids(&self) -> std::sync::MutexGuard<'_, IdSequence> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(id).map(|e| e.value().clone()))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rooms)
    }

    async fn insert_room(&self, room: Room) -> Result<(), StoreError> {
        self.add_room(room)
    }

    async fn next_booking_id(&self) -> Result<BookingId, StoreError> {
        self.lock_ids().next().ok_or(StoreError::IdsExhausted)
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.add_booking(booking)
    }

    async fn find_booking_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn find_confirmed_bookings(&self, room_id: &str) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .by_room
            .get(room_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
            .filter(Booking::is_confirmed)
            .collect())
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self.sorted_bookings())
    }

    async fn update_booking_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        new: BookingStatus,
        cancelled_at: Option<Ms>,
    ) -> Result<u64, StoreError> {
        Ok(self.transition(&id, expected, new, cancelled_at).map_or(0, |_| 1))
    }
}
