//! Bidirectional job channels.
//!
//! A [`Transport`] opens a [`JobChannel`] to an endpoint URL. Opening never
//! fails at the call site: connection problems are reported through the same
//! [`ChannelEvent`] stream that carries server frames, so callers have a single
//! failure path.
use async_trait::async_trait;
use thiserror::Error;

mod websocket;

pub use websocket::{WebSocketChannel, WebSocketTransport, DEFAULT_CONNECT_TIMEOUT};

/// Raw payload of one server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Observable channel lifecycle and traffic, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(InboundFrame),
    Error(String),
    /// `clean` is true only when the peer completed a close handshake.
    Closed {
        clean: bool,
        code: Option<u16>,
        reason: String,
    },
}

impl ChannelEvent {
    pub fn text(frame: impl Into<String>) -> Self {
        Self::Message(InboundFrame::Text(frame.into()))
    }

    pub fn unclean_close(reason: impl Into<String>) -> Self {
        Self::Closed {
            clean: false,
            code: None,
            reason: reason.into(),
        }
    }
}

/// Enumerates supported `TransportError` values.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel is not open")]
    NotOpen,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Trait contract for one open job channel.
#[async_trait]
pub trait JobChannel: Send {
    /// Transmits one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next channel event, or `None` once the channel has been closed and
    /// drained.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Closes the channel locally. Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Trait contract for `Transport` behavior.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Box<dyn JobChannel>;
}
