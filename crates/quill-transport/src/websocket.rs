use std::collections::VecDeque;
use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::{ChannelEvent, InboundFrame, JobChannel, Transport, TransportError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout: connect_timeout.max(Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Box<dyn JobChannel> {
        let channel = match tokio::time::timeout(self.connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, _response))) => {
                tracing::debug!(url, "job socket connected");
                WebSocketChannel::connected(stream)
            }
            Ok(Err(error)) => {
                tracing::debug!(url, %error, "job socket connect failed");
                WebSocketChannel::failed(format!("failed to connect to {url}: {error}"))
            }
            Err(_) => WebSocketChannel::failed(format!(
                "failed to connect to {url}: timed out after {}ms",
                self.connect_timeout.as_millis()
            )),
        };
        Box::new(channel)
    }
}

/// One WebSocket job channel.
pub struct WebSocketChannel {
    stream: Option<WsStream>,
    pending: VecDeque<ChannelEvent>,
}

impl WebSocketChannel {
    fn connected(stream: WsStream) -> Self {
        Self {
            stream: Some(stream),
            pending: VecDeque::from([ChannelEvent::Opened]),
        }
    }

    fn failed(detail: String) -> Self {
        Self {
            stream: None,
            pending: VecDeque::from([
                ChannelEvent::Error(detail.clone()),
                ChannelEvent::unclean_close(detail),
            ]),
        }
    }
}

#[async_trait]
impl JobChannel for WebSocketChannel {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.send(WsMessage::Text(frame.into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        let stream = self.stream.as_mut()?;
        loop {
            let Some(next) = stream.next().await else {
                self.stream = None;
                return Some(ChannelEvent::unclean_close(
                    "stream ended without a close frame",
                ));
            };
            let message = match next {
                Ok(message) => message,
                Err(error) => {
                    self.stream = None;
                    if is_abrupt_disconnect(&error) {
                        return Some(ChannelEvent::unclean_close(error.to_string()));
                    }
                    self.pending
                        .push_back(ChannelEvent::unclean_close(error.to_string()));
                    return Some(ChannelEvent::Error(error.to_string()));
                }
            };
            match message {
                WsMessage::Text(text) => {
                    return Some(ChannelEvent::text(text.as_str()));
                }
                WsMessage::Binary(bytes) => {
                    return Some(ChannelEvent::Message(InboundFrame::Binary(bytes.to_vec())));
                }
                WsMessage::Close(frame) => {
                    // Flushes the queued close reply so the handshake completes.
                    if let Some(mut stream) = self.stream.take() {
                        if let Err(error) = stream.close(None).await {
                            tracing::debug!(%error, "job socket close reply failed");
                        }
                    }
                    let (code, reason) = match frame {
                        Some(frame) => (
                            Some(u16::from(frame.code)),
                            frame.reason.as_str().to_string(),
                        ),
                        None => (None, String::new()),
                    };
                    return Some(ChannelEvent::Closed {
                        clean: true,
                        code,
                        reason,
                    });
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(error) = stream.close(None).await {
                tracing::debug!(%error, "job socket close handshake failed");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn is_abrupt_disconnect(error: &WsError) -> bool {
    match error {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
