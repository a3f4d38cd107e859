//! Heartbeat Manager
//!
//! Keeps the feed connection honest: asks the receive loop to send a
//! websocket ping every `ping_interval` and reports a stall when no inbound
//! frame of any kind has arrived for `stall_timeout`.
//!
//! The feed's own `heartbeat` channel produces a frame per product every
//! second, so on a healthy connection the stall timer never fires.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default interval between websocket pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default silence tolerated before the connection is considered stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for heartbeat behavior. `None` disables either check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Option<Duration>,
    /// Silence after which the connection is restarted.
    pub stall_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Option<Duration>, stall_timeout: Option<Duration>) -> Self {
        Self {
            ping_interval,
            stall_timeout,
        }
    }

    /// Configuration with both checks off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(None, None)
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// No inbound traffic for too long; the connection should be restarted.
    Stalled {
        /// Silence observed.
        idle: Duration,
    },
}

/// Activity clock shared between the manager and the receive loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: Mutex<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with activity recorded now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Record that a frame was received.
    pub fn record_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Instant of the last recorded activity.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

/// Heartbeat manager that monitors connection health.
///
/// One manager runs per connection attempt and is cancelled with it.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, a stall is reported, or the event channel closes.
    pub async fn run(self) {
        let mut ping = self.config.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            let deadline = self
                .config
                .stall_timeout
                .map(|timeout| self.state.last_activity() + timeout);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                () = next_ping(ping.as_mut()) => {
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
                () = sleep_until(deadline) => {
                    let idle = self.state.idle_for();
                    let Some(timeout) = self.config.stall_timeout else { continue };
                    // Activity may have landed while the timer was pending.
                    if idle < timeout {
                        continue;
                    }
                    tracing::warn!(
                        idle_secs = idle.as_secs(),
                        timeout_secs = timeout.as_secs(),
                        "Feed stall detected"
                    );
                    let _ = self.event_tx.send(HeartbeatEvent::Stalled { idle }).await;
                    break;
                }
            }
        }
    }
}

async fn next_ping(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_manager(
        config: HeartbeatConfig,
    ) -> (
        Arc<HeartbeatState>,
        mpsc::Receiver<HeartbeatEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, state.clone(), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());
        (state, event_rx, cancel, handle)
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Some(Duration::from_secs(15)));
        assert_eq!(config.stall_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn state_tracks_idle_time() {
        let state = HeartbeatState::new();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(state.idle_for(), Duration::from_secs(5));

        state.record_activity();
        assert_eq!(state.idle_for(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn manager_sends_ping_events() {
        let config = HeartbeatConfig::new(Some(Duration::from_secs(15)), None);
        let (_state, mut event_rx, cancel, handle) = spawn_manager(config);

        let start = Instant::now();
        let event = event_rx.recv().await.unwrap();

        assert_eq!(event, HeartbeatEvent::SendPing);
        assert!(start.elapsed() >= Duration::from_secs(15));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manager_reports_stall_after_silence() {
        let config = HeartbeatConfig::new(None, Some(Duration::from_secs(30)));
        let (_state, mut event_rx, _cancel, handle) = spawn_manager(config);

        let event = event_rx.recv().await.unwrap();

        assert!(matches!(event, HeartbeatEvent::Stalled { idle } if idle >= Duration::from_secs(30)));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_stall() {
        let config = HeartbeatConfig::new(None, Some(Duration::from_secs(30)));
        let (state, mut event_rx, cancel, handle) = spawn_manager(config);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(20)).await;
            state.record_activity();
        }
        tokio::task::yield_now().await;
        assert!(event_rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let (_state, _event_rx, cancel, handle) = spawn_manager(HeartbeatConfig::default());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }

    #[tokio::test]
    async fn disabled_manager_waits_for_cancel() {
        let (_state, mut event_rx, cancel, handle) = spawn_manager(HeartbeatConfig::disabled());

        let waited = tokio::time::timeout(Duration::from_millis(50), event_rx.recv()).await;
        assert!(waited.is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
