use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::limits::*;
use crate::model::*;

use super::pricing::round_money;
use super::{Engine, EngineError};

impl Engine {
    /// Every booking, any status, oldest first.
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, EngineError> {
        self.store_call(self.store.list_bookings()).await
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.store_call(self.store.find_booking_by_id(id))
            .await?
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        self.store_call(self.store.list_rooms()).await
    }

    pub async fn get_room(&self, id: &str) -> Result<Room, EngineError> {
        self.store_call(self.store.get_room(id))
            .await?
            .ok_or_else(|| EngineError::RoomNotFound(id.to_string()))
    }

    /// Hours booked and revenue per room for confirmed bookings starting on
    /// local days `from..=to`. Every room is listed, sorted by id, zeros included.
    pub async fn room_usage(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<RoomUsage>, EngineError> {
        if from > to {
            return Err(EngineError::InvalidRange("report start date is after end date"));
        }
        if (to - from).num_days() >= MAX_REPORT_DAYS {
            return Err(EngineError::InvalidRange("report range too wide"));
        }
        let after = to
            .succ_opt()
            .ok_or(EngineError::InvalidRange("report end date out of range"))?;
        // from <= to, so the window covers at least one whole local day.
        let window = Span::new(self.schedule.day_start(from), self.schedule.day_start(after));

        let rooms = self.store_call(self.store.list_rooms()).await?;
        let mut usage = Vec::with_capacity(rooms.len());
        for room in rooms {
            let bookings = self
                .store_call(self.store.find_confirmed_bookings(&room.id))
                .await?;
            let mut millis: Ms = 0;
            let mut revenue = Decimal::ZERO;
            for b in bookings.iter().filter(|b| window.contains_instant(b.span.start)) {
                millis += b.span.duration_ms();
                revenue += b.total_price;
            }
            usage.push(RoomUsage {
                room_id: room.id,
                room_name: room.name,
                total_hours: round_money(Decimal::from(millis) / Decimal::from(HOUR_MS)),
                total_revenue: round_money(revenue),
            });
        }
        Ok(usage)
    }
}
