//! Latest Tick Port (Driven Port)
//!
//! Single-slot, overwrite-on-write notification of the most recent decoded
//! tick. Consumers that fall behind see only the newest value; the producer
//! never blocks.

use tokio::sync::watch;

use crate::domain::Tick;

/// Anything that exposes a latest-tick slot.
pub trait LatestTickSource: Send + Sync {
    /// Subscribe to the slot.
    fn latest_ticks(&self) -> LatestTick;
}

/// Receiving side of a latest-tick slot.
#[derive(Debug, Clone)]
pub struct LatestTick {
    rx: watch::Receiver<Option<Tick>>,
}

impl LatestTick {
    /// Wrap a watch receiver.
    #[must_use]
    pub const fn new(rx: watch::Receiver<Option<Tick>>) -> Self {
        Self { rx }
    }

    /// Wait for the next published tick.
    ///
    /// Returns `None` once the producer has been dropped.
    pub async fn changed(&mut self) -> Option<Tick> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(tick) = self.rx.borrow_and_update().clone() {
                return Some(tick);
            }
        }
    }

    /// Value currently in the slot, without marking it seen.
    #[must_use]
    pub fn peek(&self) -> Option<Tick> {
        self.rx.borrow().clone()
    }
}
