//! Core transport trait definitions

use async_trait::async_trait;
use tokenbridge_core::{AgentRole, BridgeResult, InboundFrame, OutboundFrame};

/// One open, ordered, lossless socket to an agent endpoint
#[async_trait]
pub trait AgentTransport: Send {
    /// Write one frame
    async fn send(&mut self, frame: OutboundFrame) -> BridgeResult<()>;

    /// Next frame from the agent; `Ok(None)` once the agent closed the socket
    async fn receive(&mut self) -> BridgeResult<Option<InboundFrame>>;

    /// Close the socket from our side
    async fn close(&mut self) -> BridgeResult<()>;

    /// Get transport type identifier
    fn transport_type(&self) -> &'static str;
}

/// Opens transports for agent roles
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Open a socket to the endpoint serving `role`.
    ///
    /// May stay pending indefinitely; callers bound it with the connect
    /// deadline.
    async fn open(&self, role: AgentRole) -> BridgeResult<Box<dyn AgentTransport>>;
}
