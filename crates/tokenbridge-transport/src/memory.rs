//! In-memory agent transport
//!
//! Pairs a client-side [`MemoryTransport`] with an [`AgentHandle`] that
//! plays the agent. Channels are unbounded and ordered, which matches the
//! in-order, lossless delivery the chunk protocol depends on.

use crate::transport::{AgentConnector, AgentTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokenbridge_core::{AgentRole, BridgeError, BridgeResult, InboundFrame, OutboundFrame};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Listener {
    /// Accept connections and hand the agent side to the receiver
    Accept(mpsc::UnboundedSender<AgentHandle>),
    /// Never complete the open, like an agent that is not running
    Silent,
}

/// Connector whose endpoints are served in-process
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    listeners: Arc<Mutex<HashMap<AgentRole, Listener>>>,
}

impl MemoryConnector {
    /// Connector with no listeners; every role starts unreachable
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `role`; each successful open yields an [`AgentHandle`]
    pub fn listen(&self, role: AgentRole) -> mpsc::UnboundedReceiver<AgentHandle> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.lock().insert(role, Listener::Accept(sender));
        receiver
    }

    /// Make opens for `role` hang forever
    pub fn silence(&self, role: AgentRole) {
        self.listeners.lock().insert(role, Listener::Silent);
    }

    /// Refuse opens for `role`
    pub fn refuse(&self, role: AgentRole) {
        self.listeners.lock().remove(&role);
    }
}

#[async_trait]
impl AgentConnector for MemoryConnector {
    async fn open(&self, role: AgentRole) -> BridgeResult<Box<dyn AgentTransport>> {
        let accepted = {
            let listeners = self.listeners.lock();
            match listeners.get(&role) {
                None => None,
                Some(Listener::Silent) => Some(None),
                Some(Listener::Accept(sender)) => Some(Some(sender.clone())),
            }
        };

        let sender = match accepted {
            None => return Err(BridgeError::network(format!("{role} endpoint refused connection"))),
            Some(None) => return std::future::pending().await,
            Some(Some(sender)) => sender,
        };

        let (transport, handle) = MemoryTransport::pair(role);
        sender
            .send(handle)
            .map_err(|_| BridgeError::network(format!("{role} endpoint stopped listening")))?;
        Ok(Box::new(transport))
    }
}

/// Client side of an in-memory agent socket
#[derive(Debug)]
pub struct MemoryTransport {
    to_agent: Option<mpsc::UnboundedSender<OutboundFrame>>,
    from_agent: mpsc::UnboundedReceiver<InboundFrame>,
}

impl MemoryTransport {
    /// Create a connected client/agent pair
    pub fn pair(role: AgentRole) -> (Self, AgentHandle) {
        let (to_agent, from_client) = mpsc::unbounded_channel();
        let (to_client, from_agent) = mpsc::unbounded_channel();
        (
            Self {
                to_agent: Some(to_agent),
                from_agent,
            },
            AgentHandle {
                role,
                from_client,
                to_client: Some(to_client),
            },
        )
    }
}

#[async_trait]
impl AgentTransport for MemoryTransport {
    async fn send(&mut self, frame: OutboundFrame) -> BridgeResult<()> {
        let sender = self
            .to_agent
            .as_ref()
            .ok_or_else(|| BridgeError::network("memory transport closed"))?;
        sender
            .send(frame)
            .map_err(|_| BridgeError::network("agent side disconnected"))
    }

    async fn receive(&mut self) -> BridgeResult<Option<InboundFrame>> {
        Ok(self.from_agent.recv().await)
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.to_agent = None;
        self.from_agent.close();
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

/// Agent side of an in-memory socket
#[derive(Debug)]
pub struct AgentHandle {
    role: AgentRole,
    from_client: mpsc::UnboundedReceiver<OutboundFrame>,
    to_client: Option<mpsc::UnboundedSender<InboundFrame>>,
}

impl AgentHandle {
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Next frame from the client; `None` once the client closed
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.from_client.recv().await
    }

    /// Next frame as text; binary uploads render as a size marker
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            OutboundFrame::Text(text) => Some(text),
            OutboundFrame::Binary(bytes) => Some(format!("<{} binary bytes>", bytes.len())),
        }
    }

    /// Frame already queued by the client, if any
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.from_client.try_recv().ok()
    }

    /// Send a text reply; false once the client hung up
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(InboundFrame::Text(text.into()))
    }

    /// Send a binary chunk; false once the client hung up
    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.push(InboundFrame::Binary(bytes))
    }

    /// Close the agent side; the client sees end-of-stream
    pub fn close(&mut self) {
        self.to_client = None;
    }

    fn push(&self, frame: InboundFrame) -> bool {
        self.to_client
            .as_ref()
            .map(|sender| sender.send(frame).is_ok())
            .unwrap_or(false)
    }
}
