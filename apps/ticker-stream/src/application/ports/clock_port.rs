//! Clock Port (Driven Port)
//!
//! Source of "now" for the aggregator, swappable under test.

use chrono::{DateTime, Utc};

/// Wall-clock source.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
