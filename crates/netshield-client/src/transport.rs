//! The seam between the manager and the network.

use crate::error::TransportError;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Opens transports.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// One open duplex text connection.
pub trait Transport: Send + 'static {
    fn send_text(&mut self, text: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound text frame. `None` once the peer has closed.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Best-effort graceful close.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");
        Ok(WsTransport { ws })
    }
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "close frame received");
                    return None;
                }
                // Binary payloads aren't part of the protocol; ping/pong
                // control frames are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!("websocket close: {}", e);
        }
    }
}
