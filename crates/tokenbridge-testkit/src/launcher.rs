//! Launcher double that records launch requests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokenbridge_core::{AgentRole, BridgeResult};
use tokenbridge_transport::AgentLauncher;

#[derive(Debug, Clone, Default)]
pub struct RecordingLauncher {
    launches: Arc<Mutex<Vec<AgentRole>>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roles a launch was requested for, in order
    pub fn launches(&self) -> Vec<AgentRole> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl AgentLauncher for RecordingLauncher {
    async fn launch(&self, role: AgentRole) -> BridgeResult<()> {
        self.launches.lock().push(role);
        Ok(())
    }
}
