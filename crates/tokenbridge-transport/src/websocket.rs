//! WebSocket agent transport
//!
//! The agent listens on a local WebSocket per role. TCP gives the in-order,
//! lossless delivery chunk reassembly relies on.

use crate::transport::{AgentConnector, AgentTransport};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokenbridge_core::{AgentEndpoints, AgentRole, BridgeError, BridgeResult, InboundFrame, OutboundFrame};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Opens WebSocket transports from the configured endpoint table
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoints: AgentEndpoints,
}

impl WebSocketConnector {
    /// Connector dialling the URLs in `endpoints`
    pub fn new(endpoints: AgentEndpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl AgentConnector for WebSocketConnector {
    async fn open(&self, role: AgentRole) -> BridgeResult<Box<dyn AgentTransport>> {
        let endpoint = self.endpoints.url_for(role).to_string();
        let (stream, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| BridgeError::network(format!("WebSocket connect to {endpoint} failed: {e}")))?;

        debug!(
            role = %role,
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket connection established"
        );

        Ok(Box::new(WebSocketTransport { stream, endpoint }))
    }
}

/// Client side of one agent WebSocket
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    endpoint: String,
}

impl WebSocketTransport {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentTransport for WebSocketTransport {
    async fn send(&mut self, frame: OutboundFrame) -> BridgeResult<()> {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text),
            OutboundFrame::Binary(bytes) => Message::Binary(bytes),
        };

        self.stream
            .send(message)
            .await
            .map_err(|e| BridgeError::network(format!("WebSocket send failed: {e}")))
    }

    async fn receive(&mut self) -> BridgeResult<Option<InboundFrame>> {
        loop {
            let message = match self.stream.next().await {
                None => return Ok(None),
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => {
                    return Err(BridgeError::network(format!("WebSocket receive failed: {e}")))
                }
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => return Ok(Some(InboundFrame::Text(text))),
                Message::Binary(bytes) => return Ok(Some(InboundFrame::Binary(bytes))),
                Message::Close(frame) => {
                    trace!(endpoint = %self.endpoint, ?frame, "Agent closed WebSocket");
                    return Ok(None);
                }
                Message::Ping(data) => {
                    // Auto-respond to ping with pong
                    self.stream.send(Message::Pong(data)).await.map_err(|e| {
                        BridgeError::network(format!("WebSocket pong failed: {e}"))
                    })?;
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> BridgeResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(BridgeError::network(format!("WebSocket close failed: {e}"))),
        }
    }

    fn transport_type(&self) -> &'static str {
        "websocket"
    }
}
