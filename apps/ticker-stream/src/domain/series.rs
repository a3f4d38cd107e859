//! Rolling Price Series
//!
//! Time-ordered, time-windowed collection of accepted ticks together with the
//! bounds derived from it.
//!
//! # Invariants
//!
//! - Ticks are ordered by `occurred_at`, ties kept in insertion order.
//! - No tick is admitted with an `occurred_at` later than the caller's "now".
//! - After every mutation, no retained tick is older than `now - window`.
//! - Bounds are recomputed on every mutation, so they always describe the
//!   ticks they sit next to.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::bounds::{DerivedBounds, window_start};
use super::tick::Tick;

/// Default rolling window (10 minutes).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// Default minimum spacing between accepted ticks.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Window and throttle configuration for a [`PriceSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Maximum age of a retained tick.
    pub window: Duration,
    /// Minimum spacing between two accepted ticks (`None` disables throttling).
    pub sample_interval: Option<Duration>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            sample_interval: Some(DEFAULT_SAMPLE_INTERVAL),
        }
    }
}

impl WindowConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(window: Duration, sample_interval: Option<Duration>) -> Self {
        Self {
            window,
            sample_interval,
        }
    }

    /// Configuration with the throttle disabled.
    #[must_use]
    pub const fn unthrottled(window: Duration) -> Self {
        Self::new(window, None)
    }

    fn window_delta(&self) -> TimeDelta {
        to_delta(self.window)
    }

    fn sample_delta(&self) -> Option<TimeDelta> {
        self.sample_interval.map(to_delta)
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Result of offering a tick to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick appended; `pruned` older ticks were evicted in the same pass.
    Accepted {
        /// Number of expired ticks removed.
        pruned: usize,
    },
    /// Tick stamped after "now"; dropped.
    FutureDated,
    /// Tick arrived inside the sample interval; dropped.
    Throttled,
}

impl TickOutcome {
    /// Whether the tick made it into the series.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::FutureDated => "future_dated",
            Self::Throttled => "throttled",
        }
    }
}

/// Ordered, windowed series of ticks.
///
/// The series is plain data: callers supply "now" on every mutation, which
/// keeps it deterministic under test and free of any clock dependency.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeDelta, Utc};
/// use rust_decimal::Decimal;
/// use ticker_stream::domain::{PriceSeries, Tick, WindowConfig};
///
/// let now = Utc::now();
/// let mut series = PriceSeries::new(WindowConfig::default(), now);
///
/// let outcome = series.on_tick(Tick::new(Decimal::new(97_000, 0), now), now);
/// assert!(outcome.is_accepted());
///
/// // Future-dated ticks never enter the series.
/// let future = Tick::new(Decimal::new(98_000, 0), now + TimeDelta::seconds(10));
/// assert!(!series.on_tick(future, now).is_accepted());
/// assert_eq!(series.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct PriceSeries {
    config: WindowConfig,
    ticks: Vec<Tick>,
    last_accepted_at: Option<DateTime<Utc>>,
    bounds: DerivedBounds,
}

impl PriceSeries {
    /// Create an empty series observed at `now`.
    #[must_use]
    pub const fn new(config: WindowConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            ticks: Vec::new(),
            last_accepted_at: None,
            bounds: DerivedBounds::empty(now),
        }
    }

    /// Window configuration.
    #[must_use]
    pub const fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Offer a tick observed at `now`.
    ///
    /// Future-dated and throttled ticks leave the series and its bounds
    /// untouched; the time axis only moves on acceptance or [`prune`](Self::prune).
    /// Accepted ticks are inserted in order, expired ticks are pruned and the
    /// bounds recomputed, all in one call.
    pub fn on_tick(&mut self, tick: Tick, now: DateTime<Utc>) -> TickOutcome {
        if tick.occurred_at() > now {
            return TickOutcome::FutureDated;
        }

        if let (Some(interval), Some(last)) = (self.config.sample_delta(), self.last_accepted_at)
            && now - last < interval
        {
            return TickOutcome::Throttled;
        }

        self.ticks.push(tick);
        // Stable: equal timestamps keep insertion order.
        self.ticks.sort_by_key(Tick::occurred_at);
        self.last_accepted_at = Some(now);

        let pruned = self.prune(now);
        TickOutcome::Accepted { pruned }
    }

    /// Evict ticks that fell out of the window and recompute the bounds.
    ///
    /// Returns the number of ticks removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = window_start(now, self.config.window_delta());
        let before = self.ticks.len();
        // The series is sorted, so expired ticks form a prefix.
        let expired = self.ticks.partition_point(|t| t.occurred_at() <= cutoff);
        self.ticks.drain(..expired);
        self.recompute(now);
        before - self.ticks.len()
    }

    /// Drop every tick and reset the throttle.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.ticks.clear();
        self.last_accepted_at = None;
        self.recompute(now);
    }

    /// Retained ticks, oldest first.
    #[must_use]
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    /// Bounds as of the last mutation.
    #[must_use]
    pub const fn bounds(&self) -> &DerivedBounds {
        &self.bounds
    }

    /// Most recent tick, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.last()
    }

    /// Number of retained ticks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Whether the series holds no ticks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        self.bounds = DerivedBounds::compute(&self.ticks, self.config.window_delta(), now);
    }
}
