//! Reconnection Policy
//!
//! Fixed-delay reconnection for the feed connection: every failed or dropped
//! connection waits the same delay before the next attempt, with no growth
//! and no attempt limit.

use std::time::Duration;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before each reconnection attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration with a custom delay.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

/// Reconnection policy with a fixed delay.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ticker_stream::infrastructure::coinbase::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// assert_eq!(policy.attempt_count(), 2);
///
/// // Connection re-established
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Count an attempt and return the delay to wait before it.
    #[must_use]
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.config.delay
    }

    /// Reset the attempt counter after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_one_second() {
        assert_eq!(ReconnectConfig::default().delay, Duration::from_secs(1));
    }

    #[test]
    fn delay_never_grows() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::new(Duration::from_millis(250)));
        for attempt in 1..=1_000 {
            assert_eq!(policy.next_delay(), Duration::from_millis(250));
            assert_eq!(policy.attempt_count(), attempt);
        }
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn attempt_count_saturates() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        policy.attempt_count = u32::MAX;
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), u32::MAX);
    }
}
