//! Ticker Stream Configuration Settings
//!
//! Configuration types for the ticker stream, loaded from environment
//! variables. Parsing goes through a lookup function so tests and `.env`
//! files share the same code path as the process environment.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::application::services::AggregatorConfig;
use crate::domain::WindowConfig;
use crate::infrastructure::coinbase::{
    COINBASE_FEED_URL, DEFAULT_PRODUCT_ID, HeartbeatConfig, ReconnectConfig,
    StreamConnectionConfig,
};

/// Upper bound on every configured duration (one week).
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Feed endpoint and subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Websocket URL of the feed.
    pub url: String,
    /// Products to subscribe to, sorted and de-duplicated.
    pub product_ids: BTreeSet<String>,
    /// Additional bare channels to join.
    pub extra_channels: Vec<String>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: COINBASE_FEED_URL.to_string(),
            product_ids: BTreeSet::from([DEFAULT_PRODUCT_ID.to_string()]),
            extra_channels: Vec::new(),
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Delay before each reconnection attempt.
    pub reconnect_delay: Duration,
    /// Interval between pings (`None` = disabled).
    pub ping_interval: Option<Duration>,
    /// Silence tolerated before reconnecting (`None` = disabled).
    pub stall_timeout: Option<Duration>,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            ping_interval: Some(Duration::from_secs(15)),
            stall_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Rolling window settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    /// Maximum age of a retained tick.
    pub window: Duration,
    /// Minimum spacing between accepted ticks (`None` = no throttle).
    pub sample_interval: Option<Duration>,
    /// Interval between clock-driven refreshes.
    pub refresh_interval: Duration,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(600),
            sample_interval: Some(Duration::from_secs(1)),
            refresh_interval: Duration::from_secs(1),
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSettings {
    /// Prometheus listener port (0 = recorder only).
    pub port: u16,
}

/// Complete ticker stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickerStreamConfig {
    /// Feed settings.
    pub feed: FeedSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Rolling window settings.
    pub window: WindowSettings,
    /// Metrics settings.
    pub metrics: MetricsSettings,
}

impl TickerStreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a `.env` style file.
    ///
    /// Variables already set in the process environment take precedence over
    /// the file, matching `dotenvy`'s own loading rules. The process
    /// environment itself is not modified.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value fails
    /// validation.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file: HashMap<String, String> =
            dotenvy::from_path_iter(path.as_ref())?.collect::<Result<_, _>>()?;

        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset keys take their defaults. Numeric values that do not parse are
    /// logged and replaced by the default.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let feed_defaults = FeedSettings::default();
        let ws_defaults = WebSocketSettings::default();
        let window_defaults = WindowSettings::default();

        let url = env
            .string("TICKER_FEED_URL")
            .unwrap_or(feed_defaults.url);
        validate_url(&url)?;

        let product_ids = match env.string("TICKER_PRODUCT_IDS") {
            Some(raw) => parse_product_ids(&raw)?,
            None => feed_defaults.product_ids,
        };

        let extra_channels = env
            .string("TICKER_EXTRA_CHANNELS")
            .map(|raw| parse_channels(&raw))
            .unwrap_or_default();

        let websocket = WebSocketSettings {
            reconnect_delay: env.millis("TICKER_RECONNECT_DELAY_MS", ws_defaults.reconnect_delay),
            ping_interval: env.optional_secs("TICKER_PING_INTERVAL_SECS", ws_defaults.ping_interval),
            stall_timeout: env.optional_secs("TICKER_STALL_TIMEOUT_SECS", ws_defaults.stall_timeout),
        };
        ensure_at_most("TICKER_RECONNECT_DELAY_MS", Some(websocket.reconnect_delay))?;
        ensure_at_most("TICKER_PING_INTERVAL_SECS", websocket.ping_interval)?;
        ensure_at_most("TICKER_STALL_TIMEOUT_SECS", websocket.stall_timeout)?;

        let window = WindowSettings {
            window: env.secs("TICKER_WINDOW_SECS", window_defaults.window),
            sample_interval: env.optional_millis(
                "TICKER_SAMPLE_INTERVAL_MS",
                window_defaults.sample_interval,
            ),
            refresh_interval: env.millis(
                "TICKER_REFRESH_INTERVAL_MS",
                window_defaults.refresh_interval,
            ),
        };
        if window.window.is_zero() {
            return Err(ConfigError::ZeroDuration("TICKER_WINDOW_SECS".to_string()));
        }
        if window.refresh_interval.is_zero() {
            return Err(ConfigError::ZeroDuration(
                "TICKER_REFRESH_INTERVAL_MS".to_string(),
            ));
        }
        ensure_at_most("TICKER_WINDOW_SECS", Some(window.window))?;
        ensure_at_most("TICKER_SAMPLE_INTERVAL_MS", window.sample_interval)?;
        ensure_at_most("TICKER_REFRESH_INTERVAL_MS", Some(window.refresh_interval))?;

        let metrics = MetricsSettings {
            port: env.parsed("TICKER_METRICS_PORT", MetricsSettings::default().port),
        };

        Ok(Self {
            feed: FeedSettings {
                url,
                product_ids,
                extra_channels,
            },
            websocket,
            window,
            metrics,
        })
    }

    /// Stream connection configuration.
    #[must_use]
    pub fn connection_config(&self) -> StreamConnectionConfig {
        StreamConnectionConfig {
            url: self.feed.url.clone(),
            product_ids: self.feed.product_ids.clone(),
            extra_channels: self.feed.extra_channels.clone(),
            reconnect: ReconnectConfig::new(self.websocket.reconnect_delay),
            heartbeat: HeartbeatConfig::new(
                self.websocket.ping_interval,
                self.websocket.stall_timeout,
            ),
        }
    }

    /// Aggregator configuration.
    #[must_use]
    pub const fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            window: WindowConfig::new(self.window.window, self.window.sample_interval),
            refresh_interval: self.window.refresh_interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Feed URL is not a usable websocket URL.
    #[error("invalid feed URL {url}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
    /// No products configured.
    #[error("at least one product id is required")]
    EmptyProducts,
    /// Product id is not of the form `BASE-QUOTE`.
    #[error("invalid product id: {0}")]
    InvalidProductId(String),
    /// Duration that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(String),
    /// Duration exceeds [`MAX_DURATION`].
    #[error("{key} exceeds the maximum of {max_secs}s")]
    TooLarge {
        /// Offending setting.
        key: String,
        /// Largest accepted value in seconds.
        max_secs: u64,
    },
    /// `.env` file could not be loaded.
    #[error("failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.string(key) else {
            return default;
        };
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
            default
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parsed(key, default.as_secs()))
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.parsed(key, default_ms))
    }

    /// Seconds where 0 disables the feature.
    fn optional_secs(&self, key: &str, default: Option<Duration>) -> Option<Duration> {
        let secs = self.parsed(key, default.map_or(0, |d| d.as_secs()));
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Milliseconds where 0 disables the feature.
    fn optional_millis(&self, key: &str, default: Option<Duration>) -> Option<Duration> {
        let default_ms = default.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let millis = self.parsed(key, default_ms);
        (millis > 0).then(|| Duration::from_millis(millis))
    }
}

fn ensure_at_most(key: &str, value: Option<Duration>) -> Result<(), ConfigError> {
    match value {
        Some(duration) if duration > MAX_DURATION => Err(ConfigError::TooLarge {
            key: key.to_string(),
            max_secs: MAX_DURATION.as_secs(),
        }),
        _ => Ok(()),
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = url.parse().map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
        invalid(&e.to_string())
    })?;

    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
        None => return Err(invalid("missing scheme")),
    }

    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }

    Ok(())
}

fn parse_product_ids(raw: &str) -> Result<BTreeSet<String>, ConfigError> {
    let ids: BTreeSet<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    if ids.is_empty() {
        return Err(ConfigError::EmptyProducts);
    }

    if let Some(bad) = ids.iter().find(|id| !is_product_id(id)) {
        return Err(ConfigError::InvalidProductId(bad.clone()));
    }

    Ok(ids)
}

/// `BASE-QUOTE`, alphanumeric segments.
fn is_product_id(id: &str) -> bool {
    let segments: Vec<&str> = id.split('-').collect();
    segments.len() >= 2
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn parse_channels(raw: &str) -> Vec<String> {
    let mut channels: Vec<String> = Vec::new();
    for channel in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if !channel.is_empty() && !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = TickerStreamConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TickerStreamConfig::default());
        assert_eq!(config.feed.url, "wss://ws-feed.exchange.coinbase.com");
        assert_eq!(config.window.window, Duration::from_secs(600));
        assert_eq!(config.window.sample_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.websocket.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.metrics.port, 0);
    }

    #[test]
    fn overrides_from_lookup() {
        let config = TickerStreamConfig::from_lookup(lookup(&[
            ("TICKER_FEED_URL", "ws://127.0.0.1:9000"),
            ("TICKER_PRODUCT_IDS", "eth-usd, BTC-USD,ETH-USD"),
            ("TICKER_EXTRA_CHANNELS", "level2, Level2"),
            ("TICKER_RECONNECT_DELAY_MS", "250"),
            ("TICKER_STALL_TIMEOUT_SECS", "0"),
            ("TICKER_PING_INTERVAL_SECS", "5"),
            ("TICKER_WINDOW_SECS", "60"),
            ("TICKER_SAMPLE_INTERVAL_MS", "0"),
            ("TICKER_REFRESH_INTERVAL_MS", "500"),
            ("TICKER_METRICS_PORT", "9464"),
        ]))
        .unwrap();

        assert_eq!(config.feed.url, "ws://127.0.0.1:9000");
        assert_eq!(
            config.feed.product_ids.iter().collect::<Vec<_>>(),
            vec!["BTC-USD", "ETH-USD"]
        );
        assert_eq!(config.feed.extra_channels, vec!["level2"]);
        assert_eq!(config.websocket.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.websocket.stall_timeout, None);
        assert_eq!(config.websocket.ping_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.window.window, Duration::from_secs(60));
        assert_eq!(config.window.sample_interval, None);
        assert_eq!(config.window.refresh_interval, Duration::from_millis(500));
        assert_eq!(config.metrics.port, 9464);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = TickerStreamConfig::from_lookup(lookup(&[
            ("TICKER_WINDOW_SECS", "ten minutes"),
            ("TICKER_METRICS_PORT", "99999"),
        ]))
        .unwrap();
        assert_eq!(config.window.window, Duration::from_secs(600));
        assert_eq!(config.metrics.port, 0);
    }

    #[test]
    fn rejects_non_websocket_url() {
        let err = TickerStreamConfig::from_lookup(lookup(&[(
            "TICKER_FEED_URL",
            "https://ws-feed.exchange.coinbase.com",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_url_without_host() {
        let err = TickerStreamConfig::from_lookup(lookup(&[("TICKER_FEED_URL", "wss:///feed")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_empty_product_list() {
        let err = TickerStreamConfig::from_lookup(lookup(&[("TICKER_PRODUCT_IDS", " , ,")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProducts));
    }

    #[test]
    fn rejects_malformed_product_id() {
        let err = TickerStreamConfig::from_lookup(lookup(&[("TICKER_PRODUCT_IDS", "BTC-USD,BTCUSD")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProductId(id) if id == "BTCUSD"));
    }

    #[test]
    fn rejects_zero_window() {
        let err = TickerStreamConfig::from_lookup(lookup(&[("TICKER_WINDOW_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration(key) if key == "TICKER_WINDOW_SECS"));
    }

    #[test]
    fn rejects_window_beyond_maximum() {
        let err = TickerStreamConfig::from_lookup(lookup(&[(
            "TICKER_WINDOW_SECS",
            "10000000000000",
        )]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::TooLarge { ref key, max_secs } if key == "TICKER_WINDOW_SECS" && max_secs == 604_800)
        );
    }

    #[test]
    fn rejects_timer_settings_beyond_maximum() {
        for key in [
            "TICKER_RECONNECT_DELAY_MS",
            "TICKER_SAMPLE_INTERVAL_MS",
            "TICKER_REFRESH_INTERVAL_MS",
        ] {
            let err = TickerStreamConfig::from_lookup(lookup(&[(key, "18446744073709551615")]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::TooLarge { .. }), "{key}");
        }

        let err = TickerStreamConfig::from_lookup(lookup(&[(
            "TICKER_STALL_TIMEOUT_SECS",
            "604801",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge { ref key, .. } if key == "TICKER_STALL_TIMEOUT_SECS"));
    }

    #[test]
    fn accepts_window_at_maximum() {
        let config =
            TickerStreamConfig::from_lookup(lookup(&[("TICKER_WINDOW_SECS", "604800")])).unwrap();
        assert_eq!(config.window.window, MAX_DURATION);
    }

    #[test]
    fn rejects_zero_refresh_interval() {
        let err = TickerStreamConfig::from_lookup(lookup(&[("TICKER_REFRESH_INTERVAL_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration(_)));
    }

    #[test]
    fn product_id_shapes() {
        assert!(is_product_id("BTC-USD"));
        assert!(is_product_id("1INCH-USD"));
        assert!(!is_product_id("BTC"));
        assert!(!is_product_id("BTC-"));
        assert!(!is_product_id("BTC_USD"));
    }

    #[test]
    fn derived_component_configs() {
        let config = TickerStreamConfig::from_lookup(lookup(&[
            ("TICKER_RECONNECT_DELAY_MS", "2000"),
            ("TICKER_PING_INTERVAL_SECS", "0"),
            ("TICKER_WINDOW_SECS", "120"),
        ]))
        .unwrap();

        let connection = config.connection_config();
        assert_eq!(connection.reconnect.delay, Duration::from_secs(2));
        assert_eq!(connection.heartbeat.ping_interval, None);
        assert_eq!(connection.heartbeat.stall_timeout, Some(Duration::from_secs(30)));

        let aggregator = config.aggregator_config();
        assert_eq!(aggregator.window.window, Duration::from_secs(120));
        assert_eq!(aggregator.refresh_interval, Duration::from_secs(1));
    }

    #[test]
    fn loads_env_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# ticker settings").unwrap();
        writeln!(file, "TICKER_TEST_ONLY_UNUSED=1").unwrap();
        writeln!(file, "TICKER_FEED_URL=ws://localhost:8765/feed").unwrap();
        writeln!(file, "TICKER_WINDOW_SECS=300").unwrap();
        file.flush().unwrap();

        let config = TickerStreamConfig::from_env_file(file.path()).unwrap();
        assert_eq!(config.feed.url, "ws://localhost:8765/feed");
        assert_eq!(config.window.window, Duration::from_secs(300));
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TickerStreamConfig::from_env_file(dir.path().join("missing.env")).unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile(_)));
    }
}
