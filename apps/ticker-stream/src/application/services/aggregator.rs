//! Windowed Aggregator Service
//!
//! Drives a [`PriceSeries`] from the latest-tick slot and publishes an
//! immutable [`SeriesSnapshot`] after every mutation.
//!
//! # Architecture
//!
//! ```text
//! LatestTick ──► WindowedAggregator ──► watch<Arc<SeriesSnapshot>> ──► SeriesHandle (N)
//!                  ▲
//!          refresh_interval timer (prune + republish)
//! ```
//!
//! All mutation happens on the task running [`WindowedAggregator::run`].
//! Readers only ever see whole snapshots, so a prune and the bounds
//! recomputation that follows it are observed together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Clock, LatestTick};
use crate::domain::{DerivedBounds, PriceSeries, Tick, TickOutcome, WindowConfig};
use crate::infrastructure::metrics;

/// Default interval between clock-driven refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Aggregator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Window and throttle applied to the series.
    pub window: WindowConfig,
    /// Interval between refreshes that advance the time axis without new data.
    pub refresh_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of the series at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSnapshot {
    /// Retained ticks, oldest first.
    pub ticks: Arc<[Tick]>,
    /// Bounds computed from `ticks`.
    pub bounds: DerivedBounds,
    /// Time the snapshot was taken.
    pub as_of: DateTime<Utc>,
}

impl SeriesSnapshot {
    fn of(series: &PriceSeries, as_of: DateTime<Utc>) -> Self {
        Self {
            ticks: series.ticks().into(),
            bounds: *series.bounds(),
            as_of,
        }
    }

    /// Whether there is nothing to display yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Most recent tick.
    #[must_use]
    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.last()
    }

    /// Number of ticks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }
}

// =============================================================================
// Read Side
// =============================================================================

/// Cloneable read handle onto the aggregator's published snapshots.
#[derive(Debug, Clone)]
pub struct SeriesHandle {
    rx: watch::Receiver<Arc<SeriesSnapshot>>,
}

impl SeriesHandle {
    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SeriesSnapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// Ticks in the latest snapshot.
    #[must_use]
    pub fn current_series(&self) -> Arc<[Tick]> {
        Arc::clone(&self.rx.borrow().ticks)
    }

    /// Bounds in the latest snapshot.
    #[must_use]
    pub fn current_bounds(&self) -> DerivedBounds {
        self.rx.borrow().bounds
    }

    /// Watch receiver notified on every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<SeriesSnapshot>> {
        self.rx.clone()
    }

    /// Stream of snapshots, starting with the current one.
    #[must_use]
    pub fn changes(&self) -> WatchStream<Arc<SeriesSnapshot>> {
        WatchStream::new(self.rx.clone())
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Owns the series and publishes snapshots of it.
///
/// Throttling keeps the latest value: the newest tick dropped by the sample
/// interval is held back and applied by the first refresh after the
/// interval has passed, unless a newer tick gets in first.
pub struct WindowedAggregator {
    series: PriceSeries,
    clock: Arc<dyn Clock>,
    refresh_interval: Duration,
    pending: Option<Tick>,
    snapshot_tx: watch::Sender<Arc<SeriesSnapshot>>,
}

impl std::fmt::Debug for WindowedAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedAggregator")
            .field("series_len", &self.series.len())
            .field("refresh_interval", &self.refresh_interval)
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl WindowedAggregator {
    /// Create an aggregator with an empty series.
    #[must_use]
    pub fn new(config: AggregatorConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let series = PriceSeries::new(config.window, now);
        let (snapshot_tx, _) = watch::channel(Arc::new(SeriesSnapshot::of(&series, now)));
        Self {
            series,
            clock,
            refresh_interval: config.refresh_interval,
            pending: None,
            snapshot_tx,
        }
    }

    /// Read handle onto published snapshots.
    #[must_use]
    pub fn handle(&self) -> SeriesHandle {
        SeriesHandle {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    /// Underlying series.
    #[must_use]
    pub const fn series(&self) -> &PriceSeries {
        &self.series
    }

    /// Throttled tick waiting for the sample interval to pass.
    #[must_use]
    pub const fn pending(&self) -> Option<&Tick> {
        self.pending.as_ref()
    }

    /// Offer a tick, stamping it with the aggregator's clock.
    ///
    /// Publishes a snapshot when the tick is accepted. A throttled tick
    /// replaces any tick already held back.
    pub fn on_tick(&mut self, tick: Tick) -> TickOutcome {
        let now = self.clock.now();
        let outcome = self.apply(&tick, now);
        metrics::record_series_outcome(outcome);

        match outcome {
            TickOutcome::Accepted { .. } => self.pending = None,
            TickOutcome::FutureDated => {
                tracing::debug!(
                    tick_id = %tick.id(),
                    occurred_at = %tick.occurred_at(),
                    now = %now,
                    "Dropped future-dated tick"
                );
            }
            TickOutcome::Throttled => {
                tracing::trace!(tick_id = %tick.id(), "Holding throttled tick");
                self.pending = Some(tick);
            }
        }
        outcome
    }

    /// Apply any held-back tick whose interval has passed, then prune
    /// against the current time and republish.
    ///
    /// Returns the number of ticks evicted.
    pub fn refresh(&mut self) -> usize {
        let now = self.clock.now();

        if let Some(tick) = self.pending.take() {
            let outcome = self.apply(&tick, now);
            match outcome {
                TickOutcome::Accepted { pruned } => {
                    metrics::record_series_outcome(outcome);
                    tracing::trace!(tick_id = %tick.id(), "Applied held-back tick");
                    return pruned;
                }
                TickOutcome::Throttled => self.pending = Some(tick),
                TickOutcome::FutureDated => {}
            }
        }

        let pruned = self.series.prune(now);
        metrics::record_series_pruned(pruned);
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.series.len(), "Pruned expired ticks");
        }
        self.publish(now);
        pruned
    }

    /// Drop every tick, including a held-back one, and republish.
    pub fn reset(&mut self) {
        let now = self.clock.now();
        self.pending = None;
        self.series.reset(now);
        self.publish(now);
    }

    /// Drain `source` and refresh on a timer until cancelled or the source closes.
    pub async fn run(mut self, mut source: LatestTick, cancel: CancellationToken) {
        let start = Instant::now() + self.refresh_interval;
        let mut refresh = tokio::time::interval_at(start, self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            window_secs = self.series.config().window.as_secs(),
            refresh_ms = u64::try_from(self.refresh_interval.as_millis()).unwrap_or(u64::MAX),
            "Aggregator started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Aggregator cancelled");
                    break;
                }
                next = source.changed() => {
                    if let Some(tick) = next {
                        self.on_tick(tick);
                    } else {
                        tracing::info!("Tick source closed, stopping aggregator");
                        break;
                    }
                }
                _ = refresh.tick() => {
                    self.refresh();
                }
            }
        }
    }

    /// Offer `tick` to the series at `now`; publishes on acceptance.
    fn apply(&mut self, tick: &Tick, now: DateTime<Utc>) -> TickOutcome {
        let outcome = self.series.on_tick(tick.stamped_at(now), now);
        if let TickOutcome::Accepted { pruned } = outcome {
            metrics::record_series_pruned(pruned);
            self.publish(now);
        }
        outcome
    }

    fn publish(&self, now: DateTime<Utc>) {
        metrics::set_series_length(self.series.len());
        self.snapshot_tx
            .send_replace(Arc::new(SeriesSnapshot::of(&self.series, now)));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeDelta;
    use rust_decimal::Decimal;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::application::ports::MockClock;
    use crate::domain::ValueRange;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_732_300_000, 0).unwrap()
    }

    /// Clock whose time the test advances by hand.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new(at: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(at)))
        }

        fn advance(&self, by: TimeDelta) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn tick(price: i64) -> Tick {
        Tick::new(Decimal::from(price), epoch())
    }

    #[test]
    fn starts_with_empty_snapshot() {
        let mut clock = MockClock::new();
        clock.expect_now().return_const(epoch());
        let aggregator = WindowedAggregator::new(AggregatorConfig::default(), Arc::new(clock));

        let snapshot = aggregator.handle().snapshot();
        assert!(snapshot.is_empty());
        assert!(snapshot.latest().is_none());
        assert_eq!(snapshot.bounds.value_range, ValueRange::UNIT);
        assert_eq!(snapshot.as_of, epoch());
    }

    #[test]
    fn restamps_tick_with_clock_time() {
        let mut clock = MockClock::new();
        let accepted_at = epoch() + TimeDelta::seconds(42);
        clock.expect_now().times(1).return_const(epoch());
        clock.expect_now().return_const(accepted_at);
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), Arc::new(clock));

        let original = tick(100);
        assert!(aggregator.on_tick(original.clone()).is_accepted());

        let series = aggregator.handle().current_series();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].id(), original.id());
        assert_eq!(series[0].occurred_at(), accepted_at);
    }

    #[test]
    fn throttled_tick_does_not_publish() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        let mut rx = aggregator.handle().subscribe();
        rx.mark_unchanged();

        aggregator.on_tick(tick(1));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        clock.advance(TimeDelta::milliseconds(500));
        assert_eq!(aggregator.on_tick(tick(2)), TickOutcome::Throttled);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(aggregator.series().len(), 1);
    }

    #[test]
    fn refresh_applies_latest_throttled_tick_once_interval_passes() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        let handle = aggregator.handle();

        assert!(aggregator.on_tick(tick(100)).is_accepted());
        clock.advance(TimeDelta::milliseconds(20));
        assert_eq!(aggregator.on_tick(tick(200)), TickOutcome::Throttled);
        assert_eq!(aggregator.pending().map(Tick::price), Some(Decimal::from(200)));

        // Still inside the sample interval: stays held back.
        clock.advance(TimeDelta::milliseconds(50));
        aggregator.refresh();
        assert_eq!(handle.current_series().len(), 1);
        assert!(aggregator.pending().is_some());

        clock.advance(TimeDelta::milliseconds(1_500));
        aggregator.refresh();

        let series = handle.current_series();
        let prices: Vec<_> = series.iter().map(Tick::price).collect();
        assert_eq!(prices, vec![Decimal::from(100), Decimal::from(200)]);
        assert_eq!(series[1].occurred_at(), epoch() + TimeDelta::milliseconds(1_570));
        assert!(aggregator.pending().is_none());
    }

    #[test]
    fn newer_throttled_tick_replaces_held_back_one() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());

        aggregator.on_tick(tick(100));
        clock.advance(TimeDelta::milliseconds(100));
        aggregator.on_tick(tick(150));
        clock.advance(TimeDelta::milliseconds(100));
        aggregator.on_tick(tick(175));

        clock.advance(TimeDelta::seconds(1));
        aggregator.refresh();

        let prices: Vec<_> = aggregator.series().ticks().iter().map(Tick::price).collect();
        assert_eq!(prices, vec![Decimal::from(100), Decimal::from(175)]);
    }

    #[test]
    fn accepted_tick_discards_held_back_one() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());

        aggregator.on_tick(tick(100));
        clock.advance(TimeDelta::milliseconds(100));
        aggregator.on_tick(tick(150));
        clock.advance(TimeDelta::seconds(1));
        assert!(aggregator.on_tick(tick(300)).is_accepted());
        assert!(aggregator.pending().is_none());

        clock.advance(TimeDelta::seconds(1));
        aggregator.refresh();
        let prices: Vec<_> = aggregator.series().ticks().iter().map(Tick::price).collect();
        assert_eq!(prices, vec![Decimal::from(100), Decimal::from(300)]);
    }

    #[test]
    fn refresh_prunes_and_advances_time_axis() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        let handle = aggregator.handle();

        aggregator.on_tick(tick(100));
        clock.advance(TimeDelta::seconds(5));
        aggregator.on_tick(tick(200));

        clock.advance(TimeDelta::seconds(30));
        assert_eq!(aggregator.refresh(), 0);
        let bounds = handle.current_bounds();
        assert_eq!(bounds.time_range.end, epoch() + TimeDelta::seconds(35));
        assert_eq!(bounds.time_range.start, epoch());

        clock.advance(TimeDelta::seconds(600));
        assert_eq!(aggregator.refresh(), 2);
        let snapshot = handle.snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.bounds.time_range.start, snapshot.as_of);
    }

    #[test]
    fn reset_publishes_empty_series() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        aggregator.on_tick(tick(100));

        aggregator.reset();

        assert!(aggregator.handle().snapshot().is_empty());
    }

    #[test]
    fn handle_exposes_latest_tick() {
        let clock = ManualClock::new(epoch());
        let mut aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        aggregator.on_tick(tick(100));
        clock.advance(TimeDelta::seconds(1));
        aggregator.on_tick(tick(105));

        let snapshot = aggregator.handle().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.latest().map(Tick::price), Some(Decimal::from(105)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_ticks_from_source() {
        let clock = ManualClock::new(epoch());
        let aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        let handle = aggregator.handle();
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregator.run(LatestTick::new(rx), cancel.clone()));

        let mut changes = handle.changes();
        assert!(changes.next().await.unwrap().is_empty());

        tx.send_replace(Some(tick(97_000)));
        let snapshot = changes.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.latest().map(Tick::price), Some(Decimal::from(97_000)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_refreshes_on_interval_without_ticks() {
        let clock = ManualClock::new(epoch());
        let aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock.clone());
        let mut rx = aggregator.handle().subscribe();
        rx.mark_unchanged();
        let (_tx, source) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregator.run(LatestTick::new(source), cancel.clone()));

        clock.advance(TimeDelta::seconds(1));
        tokio::time::advance(DEFAULT_REFRESH_INTERVAL).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_of, epoch() + TimeDelta::seconds(1));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_reflects_throttled_price_after_feed_goes_quiet() {
        let clock = ManualClock::new(epoch());
        let config = AggregatorConfig {
            window: WindowConfig::new(Duration::from_secs(600), Some(Duration::from_millis(300))),
            refresh_interval: Duration::from_millis(50),
        };
        let aggregator = WindowedAggregator::new(config, clock.clone());
        let handle = aggregator.handle();
        let mut snapshots = handle.subscribe();
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregator.run(LatestTick::new(rx), cancel.clone()));

        tx.send_replace(Some(tick(100)));
        snapshots.wait_for(|s| s.len() == 1).await.unwrap();

        clock.advance(TimeDelta::milliseconds(20));
        tx.send_replace(Some(tick(200)));
        tokio::task::yield_now().await;
        assert_eq!(handle.current_series().len(), 1);

        // Silence: only refreshes run from here on.
        clock.advance(TimeDelta::milliseconds(1_500));
        let snapshot = snapshots
            .wait_for(|s| s.latest().is_some_and(|t| t.price() == Decimal::from(200)))
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.len(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_source_closes() {
        let clock = ManualClock::new(epoch());
        let aggregator = WindowedAggregator::new(AggregatorConfig::default(), clock);
        let (tx, rx) = watch::channel(None);
        drop(tx);

        tokio_test::assert_ok!(
            tokio::time::timeout(
                Duration::from_secs(1),
                aggregator.run(LatestTick::new(rx), CancellationToken::new()),
            )
            .await
        );
    }
}
