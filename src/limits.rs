use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;

/// Longest bookable interval.
pub const MAX_BOOKING_DURATION_MS: Ms = 12 * HOUR_MS;

/// Cancellation needs strictly more lead time than this before the start.
pub const CANCELLATION_WINDOW_MS: Ms = 2 * HOUR_MS;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Widest usage report, in days.
pub const MAX_REPORT_DAYS: i64 = 366;
