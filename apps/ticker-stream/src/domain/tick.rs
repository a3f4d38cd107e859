//! Price Tick
//!
//! The unit of observation flowing from the feed into the rolling window.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// One price observation stamped with its receipt time.
///
/// Ticks are immutable. The identifier only exists so a renderer can diff
/// lists; two ticks with equal time and price are otherwise interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    id: Uuid,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    occurred_at: DateTime<Utc>,
}

impl Tick {
    /// Create a tick with a fresh identifier.
    #[must_use]
    pub fn new(price: Decimal, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            price,
            occurred_at,
        }
    }

    /// Synthetic identifier for list diffing.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Observed price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Receipt time of the observation.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Copy of this tick re-stamped at `at`, keeping the identifier.
    #[must_use]
    pub const fn stamped_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            price: self.price,
            occurred_at: at,
        }
    }
}
