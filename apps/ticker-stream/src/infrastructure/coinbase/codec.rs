//! Feed Codec Module
//!
//! JSON encoding and decoding for the Coinbase Exchange feed.
//!
//! Inbound frames are single JSON objects discriminated by a `type` field.
//! Only `ticker` frames carrying a string-encoded decimal `price` become
//! ticks; everything else is filtered out without being treated as an error.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{
    ErrorMessage, FeedMessage, HeartbeatMessage, SubscribeRequest, SubscriptionsMessage,
    TickerMessage,
};
use crate::domain::Tick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but has no string `type` field.
    #[error("message has no type field")]
    MissingType,
}

/// JSON codec for the Coinbase Exchange feed. Stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a frame into a tick stamped with the current time.
    ///
    /// Returns `None` for anything that is not a ticker with a usable price.
    #[must_use]
    pub fn decode(&self, text: &str) -> Option<Tick> {
        self.decode_at(text, Utc::now())
    }

    /// Decode a frame into a tick stamped at `received_at`.
    #[must_use]
    pub fn decode_at(&self, text: &str, received_at: DateTime<Utc>) -> Option<Tick> {
        match self.decode_message(text) {
            Ok(FeedMessage::Ticker(ticker)) => self.ticker_to_tick(&ticker, received_at),
            Ok(_) => None,
            Err(e) => {
                tracing::trace!(error = %e, "Undecodable frame");
                None
            }
        }
    }

    /// Classify a frame by its `type` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a string
    /// `type`, or if a known message type has an invalid shape.
    pub fn decode_message(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let msg_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(CodecError::MissingType)?;

        let message = match msg_type {
            "ticker" => FeedMessage::Ticker(serde_json::from_value::<TickerMessage>(value)?),
            "heartbeat" => FeedMessage::Heartbeat(serde_json::from_value::<HeartbeatMessage>(value)?),
            "subscriptions" => {
                FeedMessage::Subscriptions(serde_json::from_value::<SubscriptionsMessage>(value)?)
            }
            "error" => FeedMessage::Error(serde_json::from_value::<ErrorMessage>(value)?),
            other => FeedMessage::Other(other.to_string()),
        };

        Ok(message)
    }

    /// Encode a ticker subscription for `products`.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe(&self, products: &BTreeSet<String>) -> Result<String, CodecError> {
        self.encode_subscribe_with(products, &[])
    }

    /// Encode a ticker subscription with additional bare channels.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe_with(
        &self,
        products: &BTreeSet<String>,
        extra_channels: &[String],
    ) -> Result<String, CodecError> {
        self.encode(&SubscribeRequest::ticker(products, extra_channels))
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    /// Turn an already classified ticker into a tick stamped at `received_at`.
    ///
    /// Only a string `price` that parses as a decimal is accepted.
    #[must_use]
    pub fn ticker_to_tick(&self, ticker: &TickerMessage, received_at: DateTime<Utc>) -> Option<Tick> {
        let price = match ticker.price.as_ref() {
            Some(serde_json::Value::String(s)) => Decimal::from_str(s).ok(),
            _ => None,
        };
        if price.is_none() {
            tracing::trace!(price = ?ticker.price, "Ticker without usable price");
        }
        price.map(|p| Tick::new(p, received_at))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn received() -> DateTime<Utc> {
        DateTime::from_timestamp(1_732_300_000, 0).unwrap()
    }

    #[test]
    fn decode_ticker_frame() {
        let codec = JsonCodec::new();
        let json = r#"{"type":"ticker","sequence":123,"product_id":"BTC-USD","price":"97012.34","open_24h":"95000.00","time":"2024-11-22T12:00:00.000000Z"}"#;

        let tick = codec.decode_at(json, received()).unwrap();
        assert_eq!(tick.price(), Decimal::new(9_701_234, 2));
        assert_eq!(tick.occurred_at(), received());
    }

    #[test]
    fn decode_stamps_current_time() {
        let codec = JsonCodec::new();
        let before = Utc::now();
        let tick = codec.decode(r#"{"type":"ticker","price":"1.5"}"#).unwrap();
        assert!(tick.occurred_at() >= before);
        assert!(tick.occurred_at() <= Utc::now());
    }

    #[test_case(r#"{"type":"heartbeat","sequence":1,"product_id":"BTC-USD"}"# ; "heartbeat")]
    #[test_case(r#"{"type":"subscriptions","channels":[]}"# ; "subscriptions ack")]
    #[test_case(r#"{"type":"l2update","product_id":"BTC-USD","changes":[["buy","1","0.1"]]}"# ; "order book diff")]
    #[test_case(r#"{"type":"ticker","price":"abc"}"# ; "non numeric price")]
    #[test_case(r#"{"type":"ticker","price":97012.34}"# ; "numeric price")]
    #[test_case(r#"{"type":"ticker"}"# ; "missing price")]
    #[test_case(r#"{"type":"ticker","price":"NaN"}"# ; "nan price")]
    #[test_case(r#"{"price":"97012.34"}"# ; "missing type")]
    #[test_case(r#"{"type":"ticker","price":"#; "truncated json")]
    #[test_case("not json" ; "garbage")]
    #[test_case("" ; "empty frame")]
    fn decode_rejects(frame: &str) {
        assert!(JsonCodec::new().decode_at(frame, received()).is_none());
    }

    #[test]
    fn decode_message_classifies_types() {
        let codec = JsonCodec::new();

        assert!(matches!(
            codec.decode_message(r#"{"type":"ticker","price":"1"}"#).unwrap(),
            FeedMessage::Ticker(_)
        ));
        assert!(matches!(
            codec.decode_message(r#"{"type":"heartbeat"}"#).unwrap(),
            FeedMessage::Heartbeat(_)
        ));
        assert!(matches!(
            codec.decode_message(r#"{"type":"subscriptions","channels":["heartbeat"]}"#).unwrap(),
            FeedMessage::Subscriptions(_)
        ));
        assert_eq!(
            codec.decode_message(r#"{"type":"snapshot","bids":[]}"#).unwrap(),
            FeedMessage::Other("snapshot".to_string())
        );
    }

    #[test]
    fn decode_message_surfaces_feed_errors() {
        let codec = JsonCodec::new();
        let msg = codec
            .decode_message(r#"{"type":"error","message":"Failed to subscribe","reason":"bad product"}"#)
            .unwrap();

        let FeedMessage::Error(err) = msg else {
            panic!("expected error message, got {msg:?}");
        };
        assert_eq!(err.message, "Failed to subscribe");
        assert_eq!(err.reason.as_deref(), Some("bad product"));
    }

    #[test]
    fn decode_message_missing_type() {
        let err = JsonCodec::new().decode_message(r#"{"price":"1"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingType));
    }

    #[test]
    fn encode_subscribe_sorts_products() {
        let codec = JsonCodec::new();
        let products: BTreeSet<String> = ["ETH-USD", "BTC-USD"].iter().map(ToString::to_string).collect();

        let json = codec.encode_subscribe(&products).unwrap();
        assert_eq!(
            json,
            r#"{"type":"subscribe","product_ids":["BTC-USD","ETH-USD"],"channels":["heartbeat",{"name":"ticker","product_ids":["BTC-USD","ETH-USD"]}]}"#
        );
        assert_eq!(json, codec.encode_subscribe(&products).unwrap());
    }

    #[test]
    fn encode_subscribe_with_level2() {
        let codec = JsonCodec::new();
        let products: BTreeSet<String> = std::iter::once("BTC-USD".to_string()).collect();

        let json = codec
            .encode_subscribe_with(&products, &["level2".to_string()])
            .unwrap();
        assert!(json.contains(r#""channels":["level2","heartbeat","#));
    }
}
