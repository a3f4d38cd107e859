//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (clock, feed transport, tick slot).
pub mod ports;

/// Application services driving the rolling series.
pub mod services;
