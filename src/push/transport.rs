//! Push transports.
//!
//! The manager only sees [`PushTransport`] / [`PushSession`]; the WebSocket
//! implementation lives here, tests plug in scripted fakes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid push url: {0}")]
    InvalidUrl(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("session already closed")]
    Closed,
}

impl TransportError {
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn socket<E: std::fmt::Display>(err: E) -> Self {
        Self::Socket(err.to_string())
    }

    /// Whether retrying the same address can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}

/// A data frame received on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Binary(Vec<u8>),
}

/// One open push session.
#[async_trait]
pub trait PushSession: Send {
    /// Next data frame; `Ok(None)` once the peer has closed the session.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the session. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens push sessions to an address.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSession>, TransportError>;
}

/// WebSocket transport. Connect timeouts are left to the socket layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSession>, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let (stream, response) = connect_async(url)
            .await
            .map_err(TransportError::connection)?;
        debug!(url, status = response.status().as_u16(), "websocket handshake complete");
        Ok(Box::new(WsSession {
            inner: stream,
            closed: false,
        }))
    }
}

struct WsSession {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl PushSession for WsSession {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        while let Some(message) = self.inner.next().await {
            match message.map_err(TransportError::socket)? {
                Message::Text(text) => return Ok(Some(Incoming::Text(text.as_str().to_string()))),
                Message::Binary(bytes) => return Ok(Some(Incoming::Binary(bytes.to_vec()))),
                Message::Close(frame) => {
                    debug!(?frame, "websocket close frame received");
                    self.closed = true;
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("websocket control frame");
                }
            }
        }
        self.closed = true;
        Ok(None)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::socket)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.inner.close(None).await {
            debug!(error = %error, "websocket close failed");
        }
    }
}
