//! Transport seam: a connector that opens text sockets.
//!
//! The session layer only needs "send a text message" and "receive the next
//! text message", so the transport is two small object-safe traits. The
//! production implementation is a WebSocket via `tokio-tungstenite`; tests
//! plug in in-memory sockets.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::ChannelError;

/// An open, full-duplex text connection.
#[async_trait]
pub trait Socket: Send {
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next inbound text message; `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    /// Close the socket. Errors are swallowed.
    async fn close(&mut self);
}

/// Opens sockets to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>, ChannelError>;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Connector for plain and TLS WebSockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>, ChannelError> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!(%url, status = %response.status(), "ws: connected");
        Ok(Box::new(WebSocket { stream }))
    }
}

struct WebSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WebSocket {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => return Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Message::Close(frame) => {
                    debug!(?frame, "ws: close frame received");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "ws: close failed");
        }
    }
}
