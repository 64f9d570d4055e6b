use tracing::{debug, info};

use crate::model::*;
use crate::observability;

use super::conflict::{check_cancellable, find_conflict, validate_fields, validate_interval};
use super::pricing::price;
use super::{Engine, EngineError};

impl Engine {
    /// Validate, check for overlap, price and persist a new booking.
    ///
    /// Checks run in a fixed order: fields, interval ordering, lead time,
    /// duration, room existence, then overlap under the room lock.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingView, EngineError> {
        let result = self.try_create(req).await;
        match &result {
            Ok(view) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL, "room" => view.room_id.clone())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "kind" => e.kind().as_str())
                    .increment(1);
                debug!("create rejected: {e}");
            }
        }
        result
    }

    async fn try_create(&self, req: BookingRequest) -> Result<BookingView, EngineError> {
        validate_fields(&req)?;
        let now = self.now();
        let span = validate_interval(req.start, req.end, now)?;

        let room_id = req.room_id.trim();
        let room = self
            .store_call(self.store.get_room(room_id))
            .await?
            .ok_or_else(|| EngineError::RoomNotFound(room_id.to_string()))?;

        // Held until the insert lands so no other create on this room can
        // read the confirmed set in between.
        let _guard = self.lock_room(&room.id).await;

        let existing = self
            .store_call(self.store.find_confirmed_bookings(&room.id))
            .await?;
        if let Some(hit) = find_conflict(&room.id, &span, &existing) {
            return Err(EngineError::Overlap {
                existing: hit.id,
                room_id: room.id.clone(),
                window: format!(
                    "{} to {}",
                    self.schedule.format_time(hit.span.start),
                    self.schedule.format_time(hit.span.end)
                ),
            });
        }

        let total_price = price(&self.schedule, span.start, span.end, room.base_hourly_rate);
        let id = self.store_call(self.store.next_booking_id()).await?;
        let booking = Booking {
            id,
            room_id: room.id.clone(),
            user_name: req.user_name.trim().to_string(),
            span,
            total_price,
            status: BookingStatus::Confirmed,
            created_at: now,
            cancelled_at: None,
        };
        let view = booking.view();
        self.store_call(self.store.insert_booking(booking)).await?;

        info!(
            booking = %id,
            room = %room.id,
            start = %self.schedule.format_rfc3339(span.start),
            end = %self.schedule.format_rfc3339(span.end),
            price = %total_price,
            "booking created"
        );
        Ok(view)
    }

    /// Cancel a confirmed booking that starts more than two hours from now.
    pub async fn cancel_booking(&self, id: BookingId) -> Result<BookingView, EngineError> {
        let result = self.try_cancel(id).await;
        match &result {
            Ok(_) => metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1),
            Err(e) => {
                metrics::counter!(observability::CANCELLATIONS_REJECTED_TOTAL, "kind" => e.kind().as_str())
                    .increment(1);
                debug!("cancel rejected: {e}");
            }
        }
        result
    }

    async fn try_cancel(&self, id: BookingId) -> Result<BookingView, EngineError> {
        let booking = self
            .store_call(self.store.find_booking_by_id(id))
            .await?
            .ok_or(EngineError::BookingNotFound(id))?;
        if !booking.is_confirmed() {
            return Err(EngineError::AlreadyCancelled(id));
        }
        let now = self.now();
        check_cancellable(&booking, now)?;

        let matched = self
            .store_call(self.store.update_booking_status(
                id,
                BookingStatus::Confirmed,
                BookingStatus::Cancelled,
                Some(now),
            ))
            .await?;
        if matched == 0 {
            // Lost the race to a concurrent cancel.
            return Err(EngineError::AlreadyCancelled(id));
        }

        info!(booking = %id, room = %booking.room_id, "booking cancelled");
        let mut view = booking.view();
        view.status = BookingStatus::Cancelled;
        Ok(view)
    }
}
