//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `WindowedAggregator`: Feeds the rolling series and publishes snapshots

pub mod aggregator;

pub use aggregator::{
    AggregatorConfig, DEFAULT_REFRESH_INTERVAL, SeriesHandle, SeriesSnapshot, WindowedAggregator,
};
