//! Feed Transport Port (Driven Port)
//!
//! The stream connection talks to the feed through these two traits so the
//! receive loop can run against a real websocket or a scripted transport.

use async_trait::async_trait;

/// Inbound frame from the feed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Ping from the server; answer with a pong.
    Ping(Vec<u8>),
    /// Pong answering one of our pings.
    Pong(Vec<u8>),
    /// Server-initiated close.
    Close(Option<String>),
}

/// Transport-level failure. Always recoverable through reconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
    /// Transport already closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Send(_) => "send",
            Self::Receive(_) => "receive",
            Self::Closed => "closed",
        }
    }
}

/// One open connection to the feed.
#[async_trait]
pub trait FeedTransport: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a ping frame.
    async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Send a pong frame.
    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Next inbound frame; `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Close gracefully. Errors are not interesting at this point.
    async fn close(&mut self);
}

/// Opens transports to a feed URL.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a new transport.
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedTransport>, TransportError>;
}
