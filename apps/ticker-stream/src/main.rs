//! Ticker Stream Binary
//!
//! Streams the configured products' last-trade price and logs the rolling
//! series as it changes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-stream
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_FEED_URL`: Feed URL (default: wss://ws-feed.exchange.coinbase.com)
//! - `TICKER_PRODUCT_IDS`: Comma-separated products (default: BTC-USD)
//! - `TICKER_EXTRA_CHANNELS`: Extra channels to join, e.g. `level2` (default: none)
//! - `TICKER_RECONNECT_DELAY_MS`: Delay between reconnects (default: 1000)
//! - `TICKER_PING_INTERVAL_SECS`: Websocket ping interval, 0 disables (default: 15)
//! - `TICKER_STALL_TIMEOUT_SECS`: Silence before reconnecting, 0 disables (default: 30)
//! - `TICKER_WINDOW_SECS`: Rolling window (default: 600)
//! - `TICKER_SAMPLE_INTERVAL_MS`: Minimum tick spacing, 0 disables (default: 1000)
//! - `TICKER_REFRESH_INTERVAL_MS`: Time axis refresh (default: 1000)
//! - `TICKER_METRICS_PORT`: Prometheus port, 0 disables the listener (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: ticker_stream=info)

use std::sync::Arc;
use std::time::Duration;

use ticker_stream::infrastructure::telemetry;
use ticker_stream::{
    AggregatorConfig, ConnectionState, LatestTickSource, SeriesHandle, StreamConnection,
    SystemClock, TickerStreamConfig, TungsteniteConnector, WindowedAggregator, init_metrics,
};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Err only means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker stream");

    let config = TickerStreamConfig::from_env()?;
    log_config(&config);

    if let Err(e) = init_metrics(config.metrics.port) {
        tracing::warn!(error = %e, "Metrics unavailable, continuing without them");
    }

    let shutdown_token = CancellationToken::new();

    let connection = Arc::new(StreamConnection::new(
        config.connection_config(),
        Arc::new(TungsteniteConnector::new()),
    ));

    let aggregator_config: AggregatorConfig = config.aggregator_config();
    let aggregator = WindowedAggregator::new(aggregator_config, Arc::new(SystemClock));
    let series = aggregator.handle();

    let aggregator_task = tokio::spawn(
        aggregator.run(connection.latest_ticks(), shutdown_token.clone()),
    );
    let renderer_task = tokio::spawn(log_series(
        series,
        connection.state_changes(),
        shutdown_token.clone(),
    ));

    connection.start();

    await_shutdown(shutdown_token).await;

    let drain = async {
        connection.pause().await;
        if let Err(e) = aggregator_task.await {
            tracing::error!(error = %e, "Aggregator task failed");
        }
        if let Err(e) = renderer_task.await {
            tracing::error!(error = %e, "Renderer task failed");
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Ticker stream stopped");
    Ok(())
}

/// Stand-in renderer: logs connection changes and every new accepted tick.
async fn log_series(
    series: SeriesHandle,
    mut states: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut snapshots = series.subscribe();
    let mut last_logged: Option<Uuid> = None;
    let mut showed_empty = false;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(state = %state, "Feed connection");
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();

                let Some(latest) = snapshot.latest() else {
                    if !showed_empty {
                        tracing::info!("No data available");
                        showed_empty = true;
                    }
                    last_logged = None;
                    continue;
                };
                showed_empty = false;

                if last_logged == Some(latest.id()) {
                    continue;
                }
                last_logged = Some(latest.id());

                let bounds = snapshot.bounds;
                tracing::info!(
                    price = %latest.price(),
                    ticks = snapshot.len(),
                    low = %bounds.value_range.low,
                    high = %bounds.value_range.high,
                    span_secs = bounds.time_range.span().num_seconds(),
                    "Series updated"
                );
            }
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &TickerStreamConfig) {
    tracing::info!(
        url = %config.feed.url,
        products = ?config.feed.product_ids,
        window_secs = config.window.window.as_secs(),
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );
    tracing::debug!(
        extra_channels = ?config.feed.extra_channels,
        reconnect_delay = ?config.websocket.reconnect_delay,
        ping_interval = ?config.websocket.ping_interval,
        stall_timeout = ?config.websocket.stall_timeout,
        sample_interval = ?config.window.sample_interval,
        refresh_interval = ?config.window.refresh_interval,
        "Stream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
