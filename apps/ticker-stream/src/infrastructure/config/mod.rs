//! Configuration Module
//!
//! Configuration loading for the ticker stream.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, MAX_DURATION, MetricsSettings, TickerStreamConfig, WebSocketSettings,
    WindowSettings,
};
