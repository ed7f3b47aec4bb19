//! # tokenbridge-broker
//!
//! Document cryptography workflows brokered through the local token agent.
//!
//! ## What Belongs Here
//!
//! - [`DocumentService`]: the backend collaborator, as a trait
//! - [`EncryptionOrchestrator`]: sequential per-file encryption,
//!   persistence with rollback, key sharing
//! - [`DecryptionOrchestrator`]: URL downloads, attachment batches and
//!   local files
//! - [`KeyShareFanout`]: recipient batches of at most three with
//!   quiet-period reply collection
//! - [`resolve_recipients`]: user/org selection to key-capable recipients
//!
//! ## What Does NOT Belong Here
//!
//! - Socket and session handling (tokenbridge-transport)
//! - Wire encoding and chunk reassembly (tokenbridge-core)
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokenbridge_broker::{Credentials, DocumentContext, EncryptionOrchestrator, PlainFile};
//! use tokenbridge_core::{BridgeConfig, ProgressReporter};
//! use tokenbridge_transport::AgentBridge;
//!
//! let bridge = AgentBridge::websocket(BridgeConfig::load("tokenbridge.toml")?)?;
//! let encryption = EncryptionOrchestrator::new(bridge, documents, ProgressReporter::new());
//! let outcome = encryption
//!     .encrypt_and_persist(&credentials, files, &DocumentContext::new("42", "memo"))
//!     .await?;
//! ```

#![forbid(unsafe_code)]

/// Decryption workflows
pub mod decryption;

/// Backend collaborator trait and payloads
pub mod document;

/// Encryption workflow
pub mod encryption;

/// Batched key sharing
pub mod fanout;

/// Recipient resolution
pub mod recipients;

/// Chunked transfer driver
pub mod transfer;

pub use decryption::{DecryptOutcome, DecryptionOrchestrator};
pub use document::{
    AttachmentDescriptor, AttachmentUpdate, Credentials, DocumentContext, DocumentService,
    EncryptedFile, NewEncryptedBatch, PersistedBatch, PersistedFile, ShareDescriptor,
    UserCertificate,
};
pub use encryption::{EncryptionOrchestrator, EncryptionOutcome, PlainFile};
pub use fanout::{partition, KeyShareBatch, KeyShareFanout, ShareOutcome};
pub use recipients::resolve_recipients;
pub use transfer::{drive_transfer, AuxHandling, TransferEnd};
