//! Domain Layer - Ticks, the rolling series and its derived bounds.
//!
//! Pure data and functions. Nothing here knows about sockets, clocks or
//! channels; every operation that depends on time takes "now" explicitly.

/// Immutable price observation.
pub mod tick;

/// Time-ordered, windowed series of ticks.
pub mod series;

/// Display bounds derived from a series.
pub mod bounds;

pub use bounds::{DerivedBounds, TimeRange, ValueRange};
pub use series::{PriceSeries, TickOutcome, WindowConfig};
pub use tick::Tick;
