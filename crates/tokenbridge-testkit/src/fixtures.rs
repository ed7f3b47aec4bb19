//! Bridge fixtures wired to in-memory agents

use crate::agent::{Reply, ScriptedAgent};
use crate::documents::MockDocumentService;
use crate::launcher::RecordingLauncher;
use std::sync::Arc;
use tokenbridge_broker::{
    Credentials, DecryptionOrchestrator, DocumentContext, EncryptionOrchestrator, KeyShareFanout,
};
use tokenbridge_core::{AgentRole, BridgeConfig, OutboundFrame, ProgressReporter, TokioClock};
use tokenbridge_transport::{AgentBridge, MemoryConnector};

/// Certificate the scripted agents accept
pub const TEST_CERTIFICATE: &str = "MIIBtestcertificate";

/// Auth token used by fixtures
pub const TEST_AUTH_TOKEN: &str = "tok-123";

pub fn credentials() -> Credentials {
    Credentials::new(TEST_AUTH_TOKEN, TEST_CERTIFICATE)
}

pub fn document() -> DocumentContext {
    DocumentContext::new("42", "memo")
}

/// Deterministic bytes of length `len`
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|index| (index % 251) as u8).collect()
}

/// Bridge over a [`MemoryConnector`] with a recording launcher and the
/// testing config
#[derive(Debug, Clone)]
pub struct TestBridge {
    pub connector: MemoryConnector,
    pub launcher: RecordingLauncher,
    pub bridge: AgentBridge,
    pub documents: MockDocumentService,
    pub reporter: ProgressReporter,
}

impl Default for TestBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBridge {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::testing())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let connector = MemoryConnector::new();
        let launcher = RecordingLauncher::new();
        let bridge = AgentBridge::new(
            config,
            Arc::new(connector.clone()),
            Arc::new(launcher.clone()),
            Arc::new(TokioClock),
        );
        Self {
            connector,
            launcher,
            bridge,
            documents: MockDocumentService::new(),
            reporter: ProgressReporter::new(),
        }
    }

    /// Replace the backend double
    pub fn with_documents(mut self, documents: MockDocumentService) -> Self {
        self.documents = documents;
        self
    }

    /// Serve `role` with a scripted agent
    pub fn agent<F>(&self, role: AgentRole, responder: F) -> ScriptedAgent
    where
        F: FnMut(usize, &OutboundFrame) -> Vec<Reply> + Send + 'static,
    {
        ScriptedAgent::spawn(&self.connector, role, responder)
    }

    pub fn encryption(&self) -> EncryptionOrchestrator {
        EncryptionOrchestrator::new(
            self.bridge.clone(),
            Arc::new(self.documents.clone()),
            self.reporter.clone(),
        )
    }

    pub fn decryption(&self) -> DecryptionOrchestrator {
        DecryptionOrchestrator::new(
            self.bridge.clone(),
            Arc::new(self.documents.clone()),
            self.reporter.clone(),
        )
    }

    pub fn fanout(&self) -> KeyShareFanout {
        KeyShareFanout::new(self.bridge.clone(), Arc::new(self.documents.clone()))
    }
}
