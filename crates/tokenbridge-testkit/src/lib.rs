//! Test infrastructure for the tokenbridge workspace
//!
//! Scripted in-memory agents, a recording backend double, a recording
//! launcher and ready-wired bridge fixtures.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tokenbridge-testkit = { path = "../tokenbridge-testkit" }
//! ```
//!
//! ```rust,ignore
//! use tokenbridge_testkit::*;
//!
//! #[tokio::test]
//! async fn encrypts() {
//!     let fixture = TestBridge::new();
//!     let _agent = fixture.agent(AgentRole::Encrypt, EncryptScript::default().into_responder());
//!     let outcome = fixture
//!         .encryption()
//!         .encrypt_and_persist(&credentials(), files, &document())
//!         .await
//!         .unwrap();
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod agent;
pub mod documents;
pub mod fixtures;
pub mod launcher;
pub mod logging;
pub mod responders;
pub mod strategies;

pub use agent::{command_text, ReceivedFrame, Reply, ScriptedAgent};
pub use documents::{DocumentCalls, DocumentOp, MockDocumentService};
pub use fixtures::{
    credentials, document, sample_bytes, TestBridge, TEST_AUTH_TOKEN, TEST_CERTIFICATE,
};
pub use launcher::RecordingLauncher;
pub use logging::init_test_tracing;
pub use responders::{
    descriptors_json, key_for, parse_get_file_ids, scramble, wrapped_key, DecryptScript,
    EncryptScript,
};

// Re-export commonly used workspace types
pub use tokenbridge_core::{AgentRole, BridgeConfig, BridgeError, ProgressReporter};
