//! # tokenbridge-core
//!
//! Foundation types for brokering document cryptography through a local
//! hardware-token agent.
//!
//! ## What Belongs Here
//!
//! - The unified [`BridgeError`] and its [`ErrorCategory`] taxonomy
//! - The agent wire vocabulary: commands, raw frames and typed sentinel
//!   decoding ([`AgentMessage`])
//! - [`BridgeConfig`] and its TOML loader
//! - The [`Clock`] abstraction every protocol deadline runs on
//! - [`ChunkAssembler`] and the [`ProgressReporter`] it feeds
//!
//! ## What Does NOT Belong Here
//!
//! - Sockets and session lifecycle (tokenbridge-transport)
//! - Encryption, decryption and key-share orchestration (tokenbridge-broker)

#![forbid(unsafe_code)]

/// Chunked artifact reassembly
pub mod chunk;

/// Configuration and TOML loading
pub mod config;

/// Unified error type
pub mod errors;

/// Progress record and publish/subscribe reporter
pub mod progress;

/// Agent endpoint roles
pub mod role;

/// Clock abstraction
pub mod time;

/// Commands, frames and sentinel decoding
pub mod wire;

pub use chunk::{Artifact, ChunkAssembler};
pub use config::{AgentEndpoints, BridgeConfig, LauncherConfig, CHUNK_SIZE_BYTES, MAX_SHARE_BATCH};
pub use errors::{BridgeError, BridgeResult, ErrorCategory};
pub use progress::{ProgressRecord, ProgressReporter, Subscription};
pub use role::AgentRole;
pub use time::{with_deadline, Clock, TokioClock};
pub use wire::{
    AgentCommand, AgentFailure, AgentMessage, ExternalTarget, InboundFrame, OutboundFrame,
    CLOSE_POPUP_SENTINEL, COMPLETION_SENTINEL, ERROR_PREFIX, INVALID_CERT_SENTINEL,
    STOP_DOWNLOAD_SENTINEL,
};
