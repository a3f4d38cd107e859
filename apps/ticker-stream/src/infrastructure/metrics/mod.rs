//! Prometheus Metrics Module
//!
//! Exposes feed and series metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames received from the feed, ignored frames, decoded ticks
//! - **Connection**: Transport errors, reconnects, connection state
//! - **Series**: Tick outcomes, pruned ticks, series length
//!
//! # Integration
//!
//! The recorder is always installed. With a non-zero port the exporter's own
//! HTTP listener also serves `/metrics`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::TickOutcome;
use crate::infrastructure::coinbase::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Errors raised while installing the metrics recorder.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),
    /// Another global recorder is already installed.
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Install the Prometheus recorder.
///
/// With `port == 0` only the recorder is installed. Otherwise the exporter
/// listens on `0.0.0.0:port` and must be called from inside a tokio runtime.
/// Calling again returns the existing handle.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a different recorder
/// is already installed.
pub fn init_metrics(port: u16) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = if port == 0 {
        PrometheusBuilder::new().install_recorder()?
    } else {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|_| MetricsError::RecorderInstalled)?;
        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });
        handle
    };

    register_metrics();
    tracing::info!(port, "Metrics recorder installed");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frames
    describe_counter!(
        "ticker_stream_frames_received_total",
        "Total frames received from the feed"
    );
    describe_counter!(
        "ticker_stream_frames_ignored_total",
        "Total text frames that did not decode to a tick"
    );
    describe_counter!(
        "ticker_stream_ticks_decoded_total",
        "Total ticks decoded from the feed"
    );

    // Connection
    describe_counter!(
        "ticker_stream_transport_errors_total",
        "Total transport errors by kind"
    );
    describe_counter!(
        "ticker_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "ticker_stream_connection_state",
        "Connection state (0 disconnected, 1 connecting, 2 subscribed, 3 reconnecting)"
    );

    // Series
    describe_counter!(
        "ticker_stream_series_ticks_total",
        "Ticks offered to the series by outcome"
    );
    describe_counter!(
        "ticker_stream_series_pruned_total",
        "Ticks evicted from the series by the window"
    );
    describe_gauge!(
        "ticker_stream_series_length",
        "Ticks currently held in the series"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the feed.
pub fn record_frame_received() {
    counter!("ticker_stream_frames_received_total").increment(1);
}

/// Record a text frame that did not decode to a tick.
pub fn record_frame_ignored() {
    counter!("ticker_stream_frames_ignored_total").increment(1);
}

/// Record a decoded tick.
pub fn record_tick_decoded() {
    counter!("ticker_stream_ticks_decoded_total").increment(1);
}

/// Record a transport error.
pub fn record_transport_error(kind: &'static str) {
    counter!("ticker_stream_transport_errors_total", "kind" => kind).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("ticker_stream_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("ticker_stream_connection_state").set(f64::from(state.as_gauge()));
}

/// Record the outcome of offering a tick to the series.
pub fn record_series_outcome(outcome: TickOutcome) {
    counter!("ticker_stream_series_ticks_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record ticks pruned from the series.
pub fn record_series_pruned(count: usize) {
    if count > 0 {
        counter!("ticker_stream_series_pruned_total")
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

/// Update the series length gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_series_length(len: usize) {
    gauge!("ticker_stream_series_length").set(len as f64);
}

// =============================================================================
// Tests
// =============================================================================
