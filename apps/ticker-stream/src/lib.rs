#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Ticker Stream - Live Price Window
//!
//! Streams last-trade prices from the Coinbase Exchange websocket feed and
//! keeps a rolling, time-windowed series of them together with the value
//! and time ranges a chart needs to draw it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Ticks, the rolling series and derived bounds
//!   - `tick`: Immutable price observation
//!   - `series`: Ordered, windowed, throttled series
//!   - `bounds`: Value and time axis ranges
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Clock, feed transport, latest-tick slot
//!   - `services`: Windowed aggregator and its read handle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `coinbase`: Codec, stream connection, websocket transport
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Logging and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//! Coinbase WS ──► StreamConnection ──► latest tick ──► WindowedAggregator ──► SeriesSnapshot
//!   (frames)        (codec, reconnect)    (watch, 1 slot)   (throttle, prune)      (watch, N readers)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Ticks and the rolling series, no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::{
    DerivedBounds, PriceSeries, Tick, TickOutcome, TimeRange, ValueRange, WindowConfig,
};

// Ports
pub use application::ports::{
    Clock, FeedConnector, FeedTransport, Frame, LatestTick, LatestTickSource, SystemClock,
    TransportError,
};

// Aggregator service
pub use application::services::{
    AggregatorConfig, SeriesHandle, SeriesSnapshot, WindowedAggregator,
};

// Feed connection
pub use infrastructure::coinbase::{
    ConnectionState, JsonCodec, StreamConnection, StreamConnectionConfig, TungsteniteConnector,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, TickerStreamConfig};

// Metrics
pub use infrastructure::metrics::{MetricsError, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
