//! Port Interfaces
//!
//! Contracts between the core and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Clock`: source of "now"
//! - `FeedConnector` / `FeedTransport`: websocket connection to the feed
//! - `LatestTickSource`: overwrite-on-write slot the aggregator drains

mod clock_port;
mod feed_port;
mod latest_tick_port;

#[cfg(test)]
pub use clock_port::MockClock;
pub use clock_port::{Clock, SystemClock};
pub use feed_port::{FeedConnector, FeedTransport, Frame, TransportError};
pub use latest_tick_port::{LatestTick, LatestTickSource};
