use rust_decimal::{Decimal, RoundingStrategy};

use crate::limits::HOUR_MS;
use crate::model::{Ms, Span};

use super::schedule::RateSchedule;

/// One priced piece of an interval: a span that never crosses a local hour
/// boundary, charged at the multiplier in force at its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub span: Span,
    pub multiplier: Decimal,
}

/// Split `[start, end)` at every local hour boundary.
pub fn slots(schedule: &RateSchedule, start: Ms, end: Ms) -> Vec<Slot> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor < end {
        // cursor < end and the boundary is strictly after cursor, so the
        // slot is never empty.
        let slot_end = schedule.next_hour_boundary(cursor).min(end);
        out.push(Slot {
            span: Span::new(cursor, slot_end),
            multiplier: schedule.multiplier_at(cursor),
        });
        cursor = slot_end;
    }
    out
}

/// Total price of `[start, end)` at `base_rate` per hour, rounded half-up to
/// two places. Zero for an empty or inverted interval.
pub fn price(schedule: &RateSchedule, start: Ms, end: Ms, base_rate: Decimal) -> Decimal {
    // Sum rate * millis exactly, divide by the hour once.
    let weighted: Decimal = slots(schedule, start, end)
        .iter()
        .map(|slot| base_rate * slot.multiplier * Decimal::from(slot.span.duration_ms()))
        .sum();
    round_money(weighted / Decimal::from(HOUR_MS))
}

/// Half-up (away from zero) to two decimal places, always scale 2.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}
