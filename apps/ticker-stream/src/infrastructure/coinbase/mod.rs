//! Coinbase Exchange Feed Adapters
//!
//! Websocket client for the public Coinbase Exchange feed:
//!
//! - **Codec**: JSON frames to ticks, subscribe requests to JSON
//! - **Connection**: Subscribe, receive, reconnect, pause/resume
//! - **Transport**: `tokio-tungstenite` implementation of the feed ports

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use codec::{CodecError, JsonCodec};
pub use connection::{
    COINBASE_FEED_URL, ConnectionState, DEFAULT_PRODUCT_ID, StreamConnection,
    StreamConnectionConfig, StreamConnectionError,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{
    ChannelSpec, ErrorMessage, FeedMessage, HeartbeatMessage, SubscribeRequest,
    SubscriptionsMessage, TickerMessage,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::{TungsteniteConnector, TungsteniteTransport};
