//! Derived Display Bounds
//!
//! Value and time ranges a chart needs to scale its axes. Always a pure
//! function of the series plus "now", never a source of truth.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::tick::Tick;

/// Grid step the value range snaps to.
const VALUE_GRID: Decimal = Decimal::ONE_HUNDRED;

/// Fraction of the price span added above and below the extremes (5%).
const VALUE_BUFFER: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Inclusive price range for the value axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueRange {
    /// Lower bound.
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    /// Upper bound.
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
}

impl ValueRange {
    /// Unit range used whenever the data cannot produce a non-degenerate scale.
    pub const UNIT: Self = Self {
        low: Decimal::ZERO,
        high: Decimal::ONE,
    };

    /// Compute the value range for a set of ticks.
    ///
    /// Fewer than two distinct prices yields [`ValueRange::UNIT`]. Otherwise a
    /// 5% buffer is applied on both sides and the bounds are snapped outward
    /// to the nearest multiple of 100.
    #[must_use]
    pub fn from_ticks(ticks: &[Tick]) -> Self {
        let mut prices = ticks.iter().map(Tick::price);
        let Some(first) = prices.next() else {
            return Self::UNIT;
        };
        let (min, max) = prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));

        if min >= max {
            return Self::UNIT;
        }

        let buffer = (max - min) * VALUE_BUFFER;
        Self {
            low: ((min - buffer) / VALUE_GRID).floor() * VALUE_GRID,
            high: ((max + buffer) / VALUE_GRID).ceil() * VALUE_GRID,
        }
    }

    /// Whether `price` lies inside the range.
    #[must_use]
    pub fn contains(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Inclusive time range for the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    /// Start of the axis.
    pub start: DateTime<Utc>,
    /// End of the axis (always "now").
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Compute the time range ending at `now`.
    ///
    /// The start is the earliest retained tick or the window start, whichever
    /// is later, and never exceeds `now`.
    #[must_use]
    pub fn from_ticks(ticks: &[Tick], window: TimeDelta, now: DateTime<Utc>) -> Self {
        let start = ticks.first().map_or(now, |earliest| {
            earliest.occurred_at().max(window_start(now, window))
        });
        Self {
            start: start.min(now),
            end: now,
        }
    }

    /// Length of the axis.
    #[must_use]
    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Earliest instant still inside a window ending at `now`.
///
/// Saturates at the earliest representable time for windows reaching past it.
pub(crate) fn window_start(now: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Display-oriented bounds derived from the current series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedBounds {
    /// Value axis range.
    pub value_range: ValueRange,
    /// Time axis range.
    pub time_range: TimeRange,
}

impl DerivedBounds {
    /// Recompute bounds from an ordered series.
    #[must_use]
    pub fn compute(ticks: &[Tick], window: TimeDelta, now: DateTime<Utc>) -> Self {
        Self {
            value_range: ValueRange::from_ticks(ticks),
            time_range: TimeRange::from_ticks(ticks, window, now),
        }
    }

    /// Bounds of an empty series observed at `now`.
    #[must_use]
    pub const fn empty(now: DateTime<Utc>) -> Self {
        Self {
            value_range: ValueRange::UNIT,
            time_range: TimeRange {
                start: now,
                end: now,
            },
        }
    }
}
