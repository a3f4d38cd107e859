//! Feed Stream Connection
//!
//! Owns the single logical connection to the Coinbase Exchange feed.
//!
//! # Stream URL
//!
//! - Production: `wss://ws-feed.exchange.coinbase.com`
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──start()──► Connecting ──first frame──► Subscribed
//!      ▲                        ▲                           │
//!      │                        └──── delay ── Reconnecting ◄┘ (error, close, stall)
//!      └──────────── pause() from any state
//! ```
//!
//! Decoded ticks land in a single-slot watch channel. Publishing never
//! blocks the receive loop; slow readers only ever see the newest tick.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::FeedMessage;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    FeedConnector, FeedTransport, Frame, LatestTick, LatestTickSource, TransportError,
};
use crate::domain::Tick;
use crate::infrastructure::metrics;

/// Coinbase Exchange public feed.
pub const COINBASE_FEED_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// Product subscribed when none is configured.
pub const DEFAULT_PRODUCT_ID: &str = "BTC-USD";

/// Upper bound on a graceful close before the socket is simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a connection attempt ended. Always recovered by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum StreamConnectionError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Subscribe request could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server sent a close frame.
    #[error("server closed connection{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),

    /// Inbound stream ended without a close frame.
    #[error("stream ended")]
    Ended,

    /// No inbound traffic for too long.
    #[error("feed stalled for {0:?}")]
    Stalled(Duration),
}

impl StreamConnectionError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Codec(_) => "codec",
            Self::Closed(_) => "server_close",
            Self::Ended => "ended",
            Self::Stalled(_) => "stall",
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not running.
    #[default]
    Disconnected,
    /// Opening the transport and sending the subscription.
    Connecting,
    /// Receiving frames.
    Subscribed,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

impl ConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Numeric value for the state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Subscribed => 2,
            Self::Reconnecting => 3,
        }
    }

    /// Whether a receive loop owns this state.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConnectionConfig {
    /// Feed URL.
    pub url: String,
    /// Products to subscribe to.
    pub product_ids: BTreeSet<String>,
    /// Additional bare channels to join (e.g. `level2`).
    pub extra_channels: Vec<String>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl Default for StreamConnectionConfig {
    fn default() -> Self {
        Self::new(COINBASE_FEED_URL)
    }
}

impl StreamConnectionConfig {
    /// Configuration for `url` subscribed to the default product.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            product_ids: BTreeSet::from([DEFAULT_PRODUCT_ID.to_string()]),
            extra_channels: Vec::new(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Replace the subscribed products.
    #[must_use]
    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_ids = products.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect = ReconnectConfig::new(delay);
        self
    }

    /// Set the heartbeat configuration.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Resilient connection to the feed.
///
/// Manages the connection lifecycle including:
/// - Subscription on every (re)connect
/// - Heartbeat pings and stall detection
/// - Fixed-delay reconnection
/// - Pause and resume
///
/// Construct once, share through `Arc`. `start`, `resume` and `pause` must
/// be called from inside a tokio runtime.
pub struct StreamConnection {
    config: StreamConnectionConfig,
    connector: Arc<dyn FeedConnector>,
    codec: JsonCodec,
    state_tx: watch::Sender<ConnectionState>,
    latest_tx: watch::Sender<Option<Tick>>,
    task: Mutex<Option<RunningLoop>>,
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("url", &self.config.url)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(config: StreamConnectionConfig, connector: Arc<dyn FeedConnector>) -> Self {
        Self {
            config,
            connector,
            codec: JsonCodec::new(),
            state_tx: watch::Sender::new(ConnectionState::Disconnected),
            latest_tx: watch::Sender::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start the receive loop if disconnected.
    ///
    /// Returns `true` if a loop was started, `false` if one already runs.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();

        let started = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            tracing::debug!(state = %self.state(), "Feed connection already running");
            return false;
        }
        metrics::set_connection_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *task = Some(RunningLoop { cancel, handle });
        true
    }

    /// Resume after [`pause`](Self::pause). Same as [`start`](Self::start).
    pub fn resume(self: &Arc<Self>) -> bool {
        self.start()
    }

    /// Stop the receive loop and any pending reconnect, then wait for it.
    ///
    /// Idempotent.
    pub async fn pause(&self) {
        let running = {
            let mut task = self.task.lock();
            let running = task.take();
            if let Some(running) = &running {
                running.cancel.cancel();
            }
            let changed = self.state_tx.send_if_modified(|state| {
                let changed = *state != ConnectionState::Disconnected;
                *state = ConnectionState::Disconnected;
                changed
            });
            if changed {
                metrics::set_connection_state(ConnectionState::Disconnected);
            }
            running
        };

        if let Some(running) = running {
            tracing::info!("Pausing feed connection");
            if let Err(e) = running.handle.await {
                tracing::error!(error = %e, "Feed connection task failed");
            }
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Most recently decoded tick.
    #[must_use]
    pub fn latest_tick(&self) -> Option<Tick> {
        self.latest_tx.borrow().clone()
    }

    /// Connection configuration.
    #[must_use]
    pub const fn config(&self) -> &StreamConnectionConfig {
        &self.config
    }

    // =========================================================================
    // Receive Loop
    // =========================================================================

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect);

        loop {
            match self.connect_and_run(&cancel, &mut reconnect_policy).await {
                Ok(()) => break,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!(error = %e, "Feed connection error");
                    metrics::record_transport_error(e.kind());
                    self.set_state(&cancel, ConnectionState::Reconnecting);

                    let delay = reconnect_policy.next_delay();
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt = reconnect_policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to feed"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(&cancel, ConnectionState::Connecting);
                }
            }
        }

        tracing::info!("Feed connection stopped");
    }

    /// Connect, subscribe and read until error or cancellation.
    ///
    /// `Ok(())` means cancelled.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamConnectionError> {
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let mut transport = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = self.connector.connect(&self.config.url) => result?,
        };

        let subscribe = self
            .codec
            .encode_subscribe_with(&self.config.product_ids, &self.config.extra_channels)?;
        tracing::debug!(
            products = ?self.config.product_ids,
            extra_channels = ?self.config.extra_channels,
            "Sending subscribe request"
        );

        let result = match transport.send_text(subscribe).await {
            Ok(()) => {
                self.receive(transport.as_mut(), cancel, reconnect_policy)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if tokio::time::timeout(CLOSE_TIMEOUT, transport.close())
            .await
            .is_err()
        {
            tracing::debug!("Timed out closing feed transport");
        }
        result
    }

    async fn receive(
        &self,
        transport: &mut dyn FeedTransport,
        cancel: &CancellationToken,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamConnectionError> {
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat,
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let mut subscribed = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => transport.send_ping(Vec::new()).await?,
                    HeartbeatEvent::Stalled { idle } => {
                        return Err(StreamConnectionError::Stalled(idle));
                    }
                },
                frame = transport.next_frame() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(StreamConnectionError::Ended);
                        }
                    };

                    heartbeat_state.record_activity();
                    metrics::record_frame_received();

                    if let Frame::Close(reason) = frame {
                        tracing::info!(reason = ?reason, "Server sent close frame");
                        return Err(StreamConnectionError::Closed(reason));
                    }

                    if !subscribed {
                        subscribed = true;
                        reconnect_policy.reset();
                        self.set_state(cancel, ConnectionState::Subscribed);
                        tracing::info!(products = ?self.config.product_ids, "Feed subscribed");
                    }

                    match frame {
                        Frame::Text(text) => self.handle_text(&text),
                        Frame::Binary(data) => match String::from_utf8(data) {
                            Ok(text) => self.handle_text(&text),
                            Err(_) => {
                                tracing::trace!("Ignoring non UTF-8 binary frame");
                                metrics::record_frame_ignored();
                            }
                        },
                        Frame::Ping(data) => transport.send_pong(data).await?,
                        Frame::Pong(_) | Frame::Close(_) => {}
                    }
                }
            }
        }
    }

    /// Decode a text frame and publish any tick it carries.
    fn handle_text(&self, text: &str) {
        let received_at = Utc::now();

        match self.codec.decode_message(text) {
            Ok(FeedMessage::Ticker(ticker)) => {
                if let Some(tick) = self.codec.ticker_to_tick(&ticker, received_at) {
                    metrics::record_tick_decoded();
                    self.latest_tx.send_replace(Some(tick));
                    return;
                }
            }
            Ok(FeedMessage::Heartbeat(heartbeat)) => {
                tracing::trace!(
                    product_id = ?heartbeat.product_id,
                    sequence = ?heartbeat.sequence,
                    "Feed heartbeat"
                );
            }
            Ok(FeedMessage::Subscriptions(ack)) => {
                tracing::info!(channels = ?ack.channel_names(), "Subscriptions acknowledged");
            }
            Ok(FeedMessage::Error(error)) => {
                tracing::warn!(
                    message = %error.message,
                    reason = error.reason.as_deref().unwrap_or(""),
                    "Feed reported error"
                );
            }
            Ok(FeedMessage::Other(msg_type)) => {
                tracing::trace!(msg_type = %msg_type, "Ignoring message type");
            }
            Err(e) => {
                tracing::trace!(error = %e, "Ignoring undecodable frame");
            }
        }

        metrics::record_frame_ignored();
    }

    /// Move to `next` unless this loop has been cancelled.
    fn set_state(&self, cancel: &CancellationToken, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if cancel.is_cancelled() || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            metrics::set_connection_state(next);
            tracing::debug!(state = %next, "Feed connection state changed");
        }
    }
}

impl LatestTickSource for StreamConnection {
    fn latest_ticks(&self) -> LatestTick {
        LatestTick::new(self.latest_tx.subscribe())
    }
}
