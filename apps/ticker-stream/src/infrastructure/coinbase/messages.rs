//! Coinbase Exchange WebSocket Message Types
//!
//! Wire format types for the public Coinbase Exchange feed. Only the fields
//! this service reads are modeled; unknown fields are ignored.
//!
//! # Message Types
//!
//! ## Outbound
//! - `subscribe`: Channel subscription request
//!
//! ## Inbound
//! - `ticker`: Last trade price for a product
//! - `heartbeat`: Per-product liveness message
//! - `subscriptions`: Acknowledgment listing active channels
//! - `error`: Rejected request
//!
//! # References
//!
//! - [Exchange WebSocket channels](https://docs.cdp.coinbase.com/exchange/docs/websocket-channels)

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// =============================================================================
// Outbound Messages
// =============================================================================

/// Name of the ticker channel.
pub const TICKER_CHANNEL: &str = "ticker";

/// Name of the heartbeat channel.
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Channel entry in a subscribe request.
///
/// Coinbase accepts either a bare channel name (scoped to the request's
/// `product_ids`) or an object naming its own products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSpec {
    /// Bare channel name.
    Name(String),
    /// Channel with its own product list.
    Scoped {
        /// Channel name.
        name: String,
        /// Products for this channel.
        product_ids: Vec<String>,
    },
}

/// Subscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"subscribe","product_ids":["BTC-USD"],
///  "channels":["heartbeat",{"name":"ticker","product_ids":["BTC-USD"]}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always "subscribe".
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Products the request applies to.
    pub product_ids: Vec<String>,
    /// Channels to join.
    pub channels: Vec<ChannelSpec>,
}

impl SubscribeRequest {
    /// Build a ticker + heartbeat subscription for `products`.
    ///
    /// Products are emitted in sorted order. `extra_channels` are listed
    /// ahead of the heartbeat channel as bare names.
    #[must_use]
    pub fn ticker(products: &BTreeSet<String>, extra_channels: &[String]) -> Self {
        let product_ids: Vec<String> = products.iter().cloned().collect();

        let mut channels: Vec<ChannelSpec> = extra_channels
            .iter()
            .filter(|c| c.as_str() != HEARTBEAT_CHANNEL && c.as_str() != TICKER_CHANNEL)
            .map(|c| ChannelSpec::Name(c.clone()))
            .collect();
        channels.push(ChannelSpec::Name(HEARTBEAT_CHANNEL.to_string()));
        channels.push(ChannelSpec::Scoped {
            name: TICKER_CHANNEL.to_string(),
            product_ids: product_ids.clone(),
        });

        Self {
            msg_type: "subscribe".to_string(),
            product_ids,
            channels,
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Ticker message.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"ticker","sequence":1,"product_id":"BTC-USD","price":"97012.34",
///  "time":"2024-11-22T12:00:00.000000Z", ...}
/// ```
///
/// `price` stays a string here; the codec decides whether it is usable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerMessage {
    /// Product the price belongs to.
    #[serde(default)]
    pub product_id: Option<String>,
    /// Last trade price as sent by the exchange.
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    /// Feed sequence number.
    #[serde(default)]
    pub sequence: Option<u64>,
}

/// Heartbeat message.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"heartbeat","sequence":90,"last_trade_id":20,"product_id":"BTC-USD",
///  "time":"2024-11-22T12:00:00.000000Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeartbeatMessage {
    /// Product the heartbeat belongs to.
    #[serde(default)]
    pub product_id: Option<String>,
    /// Feed sequence number.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Id of the last trade seen for the product.
    #[serde(default)]
    pub last_trade_id: Option<u64>,
}

/// Subscriptions acknowledgment.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionsMessage {
    /// Active channels.
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
}

impl SubscriptionsMessage {
    /// Names of the acknowledged channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels
            .iter()
            .map(|c| match c {
                ChannelSpec::Name(name) | ChannelSpec::Scoped { name, .. } => name.as_str(),
            })
            .collect()
    }
}

/// Error message.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"error","message":"Failed to subscribe","reason":"BTC-XYZ is not a valid product"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMessage {
    /// Short description.
    #[serde(default)]
    pub message: String,
    /// Longer explanation, when provided.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Ticker update.
    Ticker(TickerMessage),
    /// Heartbeat.
    Heartbeat(HeartbeatMessage),
    /// Subscriptions acknowledgment.
    Subscriptions(SubscriptionsMessage),
    /// Error reported by the exchange.
    Error(ErrorMessage),
    /// Any other message type (order book, matches, ...).
    Other(String),
}
