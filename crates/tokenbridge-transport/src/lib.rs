//! # tokenbridge-transport
//!
//! Sockets to the local agent and the per-role session discipline on top
//! of them.
//!
//! ## What Belongs Here
//!
//! - [`AgentTransport`] / [`AgentConnector`] and their WebSocket and
//!   in-memory implementations
//! - [`Session`]: one socket, one role, one exchange at a time
//! - [`AgentBridge`]: hands out sessions and rejects a second request for a
//!   role that is already in flight
//! - [`CertificateValidator`]: the `set-cer` handshake that gates transfers
//! - [`AgentLauncher`]: starts the agent when its endpoint is unreachable
//!
//! ## What Does NOT Belong Here
//!
//! - Chunk reassembly and progress (tokenbridge-core)
//! - Encryption, decryption and key-share workflows (tokenbridge-broker)

#![forbid(unsafe_code)]

/// Per-role session registry
pub mod bridge;

/// Certificate handshake
pub mod certificate;

/// Agent launch on unreachable endpoints
pub mod launcher;

/// In-process transport
pub mod memory;

/// Session lifecycle and exchange phases
pub mod session;

/// Transport traits
pub mod transport;

/// WebSocket transport
pub mod websocket;

pub use bridge::AgentBridge;
pub use certificate::CertificateValidator;
pub use launcher::{AgentLauncher, CommandLauncher, NoopLauncher};
pub use memory::{AgentHandle, MemoryConnector, MemoryTransport};
pub use session::{ConnectOutcome, ConnectionState, ExchangePhase, Session};
pub use transport::{AgentConnector, AgentTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};
