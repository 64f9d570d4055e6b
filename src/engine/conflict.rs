use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Half-open overlap: intervals that merely touch do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

/// First confirmed booking of `room_id` that overlaps `span`, if any.
/// Cancelled bookings and other rooms' bookings are ignored.
pub fn find_conflict<'a>(room_id: &str, span: &Span, existing: &'a [Booking]) -> Option<&'a Booking> {
    existing.iter().find(|b| {
        b.room_id == room_id
            && b.is_confirmed()
            && overlaps(span.start, span.end, b.span.start, b.span.end)
    })
}

/// Field checks that need neither the clock nor the store.
pub(crate) fn validate_fields(req: &BookingRequest) -> Result<(), EngineError> {
    let room_id = req.room_id.trim();
    if room_id.is_empty() {
        return Err(EngineError::InvalidRequest("room id is required"));
    }
    if room_id.len() > MAX_ROOM_ID_LEN {
        return Err(EngineError::InvalidRequest("room id too long"));
    }
    let user_name = req.user_name.trim();
    if user_name.is_empty() {
        return Err(EngineError::InvalidRequest("user name is required"));
    }
    if user_name.len() > MAX_NAME_LEN {
        return Err(EngineError::InvalidRequest("user name too long"));
    }
    Ok(())
}

/// Ordering, lead time and length of the requested interval, in that order.
pub(crate) fn validate_interval(start: Ms, end: Ms, now: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::StartNotBeforeEnd);
    }
    if start < now {
        return Err(EngineError::StartInPast);
    }
    if end - start > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::DurationExceeded);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::TimestampOutOfRange);
    }
    // start < end was checked first.
    Ok(Span::new(start, end))
}

/// Cancellation needs strictly more than the window left before the start.
pub(crate) fn check_cancellable(booking: &Booking, now: Ms) -> Result<(), EngineError> {
    if booking.span.start - now <= CANCELLATION_WINDOW_MS {
        return Err(EngineError::CancellationWindow);
    }
    Ok(())
}
