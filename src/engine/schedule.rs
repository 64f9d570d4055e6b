use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, SecondsFormat, Timelike, Utc, Weekday,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::limits::HOUR_MS;
use crate::model::Ms;

pub const PEAK_MULTIPLIER: Decimal = dec!(1.5);

/// Local hour ranges `[from, to)` that are peak on weekdays.
const PEAK_HOURS: [(u32, u32); 2] = [(10, 13), (16, 19)];

/// Peak/off-peak classification in one fixed business offset.
///
/// All stored instants are UTC millis; the offset only decides which local
/// weekday and hour an instant falls in, and how instants are displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSchedule {
    offset: FixedOffset,
    peak_multiplier: Decimal,
}

impl RateSchedule {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            peak_multiplier: PEAK_MULTIPLIER,
        }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn offset_ms(&self) -> Ms {
        i64::from(self.offset.local_minus_utc()) * 1000
    }

    fn local(&self, t: Ms) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(t).map(|dt| dt.with_timezone(&self.offset))
    }

    /// Mon-Fri, local hour in [10,13) or [16,19).
    pub fn is_peak(&self, t: Ms) -> bool {
        let Some(local) = self.local(t) else {
            return false;
        };
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let hour = local.hour();
        PEAK_HOURS.iter().any(|&(from, to)| (from..to).contains(&hour))
    }

    pub fn multiplier_at(&self, t: Ms) -> Decimal {
        if self.is_peak(t) {
            self.peak_multiplier
        } else {
            Decimal::ONE
        }
    }

    /// First local hour boundary strictly after `t`.
    pub fn next_hour_boundary(&self, t: Ms) -> Ms {
        let off = self.offset_ms();
        ((t + off).div_euclid(HOUR_MS) + 1) * HOUR_MS - off
    }

    /// `HH:MM` in the business offset.
    pub fn format_time(&self, t: Ms) -> String {
        match self.local(t) {
            Some(local) => local.format("%H:%M").to_string(),
            None => t.to_string(),
        }
    }

    pub fn format_rfc3339(&self, t: Ms) -> String {
        match self.local(t) {
            Some(local) => local.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            None => t.to_string(),
        }
    }

    /// Local midnight at the start of `date`, as UTC millis.
    pub fn day_start(&self, date: NaiveDate) -> Ms {
        date.and_time(NaiveTime::MIN).and_utc().timestamp_millis() - self.offset_ms()
    }
}

impl Default for RateSchedule {
    fn default() -> Self {
        Self::utc()
    }
}
