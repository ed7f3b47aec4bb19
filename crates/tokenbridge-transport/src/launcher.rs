//! Out-of-band agent recovery
//!
//! When an endpoint does not open in time the bridge asks the OS to start
//! the agent and hands control back to the caller, who retries after the
//! user confirms. Launching never retries the original request itself.

use async_trait::async_trait;
use std::process::Stdio;
use tokenbridge_core::{AgentRole, BridgeError, BridgeResult, LauncherConfig};
use tracing::info;

/// Starts the local agent process
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    /// Ask the OS to start the agent serving `role`
    async fn launch(&self, role: AgentRole) -> BridgeResult<()>;
}

/// Launcher that does nothing; for embedders that handle recovery themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLauncher;

#[async_trait]
impl AgentLauncher for NoopLauncher {
    async fn launch(&self, _role: AgentRole) -> BridgeResult<()> {
        Ok(())
    }
}

/// Spawns a configured command (an executable or an OS URL opener)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLauncher {
    command: String,
    args: Vec<String>,
}

impl CommandLauncher {
    /// Launch `command` with `args`
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// `None` when no launch command is configured
    pub fn from_config(config: &LauncherConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .map(|command| Self::new(command.clone(), config.args.clone()))
    }
}

#[async_trait]
impl AgentLauncher for CommandLauncher {
    async fn launch(&self, role: AgentRole) -> BridgeResult<()> {
        let child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BridgeError::invalid(format!("failed to launch agent via {}: {e}", self.command))
            })?;

        info!(
            role = %role,
            command = %self.command,
            pid = ?child.id(),
            "Requested agent launch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_a_command() {
        assert!(CommandLauncher::from_config(&LauncherConfig::default()).is_none());

        let config = LauncherConfig {
            command: Some("open".to_string()),
            args: vec!["tokenagent://".to_string()],
        };
        assert_eq!(
            CommandLauncher::from_config(&config),
            Some(CommandLauncher::new("open", vec!["tokenagent://".to_string()]))
        );
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let launcher = CommandLauncher::new("/nonexistent/tokenagent", Vec::new());
        assert!(launcher.launch(AgentRole::Encrypt).await.is_err());
    }
}
