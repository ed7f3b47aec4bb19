//! Bridge configuration
//!
//! Endpoint table, protocol deadlines and agent launch settings. Loaded from
//! TOML; every field has a default so an empty document is valid.

use crate::errors::{BridgeError, BridgeResult};
use crate::role::AgentRole;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Nominal size of one agent chunk
pub const CHUNK_SIZE_BYTES: u64 = 1024 * 1024;

/// Upper bound on recipients per key-share command
pub const MAX_SHARE_BATCH: usize = 3;

/// WebSocket URL per agent role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEndpoints {
    /// Encrypt endpoint; also serves key sharing
    pub encrypt: String,
    /// Local file decryption endpoint
    pub decrypt: String,
    /// URL download-and-decrypt endpoint
    pub decrypt_download: String,
    /// Signing endpoint
    pub sign: String,
    /// Token presence and certificate read endpoint
    pub token_check: String,
}

impl Default for AgentEndpoints {
    fn default() -> Self {
        Self {
            encrypt: "ws://127.0.0.1:9180/encrypt".to_string(),
            decrypt: "ws://127.0.0.1:9180/decrypt".to_string(),
            decrypt_download: "ws://127.0.0.1:9180/decrypt-download".to_string(),
            sign: "ws://127.0.0.1:9180/sign".to_string(),
            token_check: "ws://127.0.0.1:9180/token-check".to_string(),
        }
    }
}

impl AgentEndpoints {
    /// Endpoint URL for a role
    pub fn url_for(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Encrypt => &self.encrypt,
            AgentRole::Decrypt => &self.decrypt,
            AgentRole::DecryptDownload => &self.decrypt_download,
            AgentRole::Sign => &self.sign,
            AgentRole::TokenCheck => &self.token_check,
        }
    }
}

/// How to start the agent when its endpoint is unreachable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Executable or OS opener; `None` disables launching
    pub command: Option<String>,
    /// Arguments passed to `command`
    pub args: Vec<String>,
}

/// Runtime configuration for the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Agent endpoint table
    pub endpoints: AgentEndpoints,
    /// Deadline for a socket to open before the agent counts as unreachable
    pub connect_timeout_ms: u64,
    /// Deadline for the certificate handshake reply
    pub certificate_timeout_ms: u64,
    /// Silence after the last key-share fragment that ends a batch
    pub share_quiet_period_ms: u64,
    /// Hard ceiling for a key-share batch
    pub share_hard_timeout_ms: u64,
    /// Recipients per key-share command (1..=3)
    pub share_batch_size: usize,
    /// Nominal chunk size used to derive expected chunk counts
    pub chunk_size_bytes: u64,
    /// Agent launch settings
    pub launcher: LauncherConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoints: AgentEndpoints::default(),
            connect_timeout_ms: 10_000,
            certificate_timeout_ms: 15_000,
            share_quiet_period_ms: 500,
            share_hard_timeout_ms: 180_000,
            share_batch_size: MAX_SHARE_BATCH,
            chunk_size_bytes: CHUNK_SIZE_BYTES,
            launcher: LauncherConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Short deadlines for tests
    pub fn testing() -> Self {
        Self {
            connect_timeout_ms: 200,
            certificate_timeout_ms: 300,
            share_quiet_period_ms: 50,
            share_hard_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::invalid(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> BridgeResult<()> {
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("certificate_timeout_ms", self.certificate_timeout_ms),
            ("share_quiet_period_ms", self.share_quiet_period_ms),
            ("share_hard_timeout_ms", self.share_hard_timeout_ms),
            ("chunk_size_bytes", self.chunk_size_bytes),
        ] {
            if value == 0 {
                return Err(BridgeError::invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.share_quiet_period_ms >= self.share_hard_timeout_ms {
            return Err(BridgeError::invalid(
                "share_quiet_period_ms must be shorter than share_hard_timeout_ms",
            ));
        }

        if !(1..=MAX_SHARE_BATCH).contains(&self.share_batch_size) {
            return Err(BridgeError::invalid(format!(
                "share_batch_size must be between 1 and {MAX_SHARE_BATCH}"
            )));
        }

        for role in AgentRole::ALL {
            let endpoint = self.endpoints.url_for(role);
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                BridgeError::invalid(format!("endpoint for {role} is not a URL: {e}"))
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(BridgeError::invalid(format!(
                    "endpoint for {role} must use ws:// or wss://"
                )));
            }
        }

        Ok(())
    }

    /// Connect deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn certificate_timeout(&self) -> Duration {
        Duration::from_millis(self.certificate_timeout_ms)
    }

    /// Silence that ends a key-share batch
    pub fn share_quiet_period(&self) -> Duration {
        Duration::from_millis(self.share_quiet_period_ms)
    }

    /// Ceiling for one key-share batch
    pub fn share_hard_timeout(&self) -> Duration {
        Duration::from_millis(self.share_hard_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_protocol_deadlines() {
        let config = BridgeConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.certificate_timeout(), Duration::from_secs(15));
        assert_eq!(config.share_quiet_period(), Duration::from_millis(500));
        assert_eq!(config.share_hard_timeout(), Duration::from_secs(180));
        assert_eq!(config.share_batch_size, 3);
        assert!(config.validate().is_ok());
        assert!(BridgeConfig::testing().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            connect_timeout_ms = 2500

            [endpoints]
            encrypt = "ws://localhost:7000/enc"

            [launcher]
            command = "xdg-open"
            args = ["tokenagent://start"]
            "#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout_ms, 2500);
        assert_eq!(config.endpoints.url_for(AgentRole::Encrypt), "ws://localhost:7000/enc");
        assert_eq!(
            config.endpoints.url_for(AgentRole::Sign),
            AgentEndpoints::default().sign
        );
        assert_eq!(config.launcher.command.as_deref(), Some("xdg-open"));
        assert_eq!(config.certificate_timeout_ms, 15_000);
    }

    #[test]
    fn batch_size_above_three_is_rejected() {
        let result = BridgeConfig::from_toml_str("share_batch_size = 4");
        assert_matches!(result, Err(BridgeError::Invalid { .. }));
    }

    #[test]
    fn zero_timeouts_and_bad_endpoints_are_rejected() {
        assert!(BridgeConfig::from_toml_str("connect_timeout_ms = 0").is_err());
        assert!(BridgeConfig::from_toml_str("[endpoints]\nsign = \"http://x\"").is_err());
        assert!(BridgeConfig::from_toml_str("[endpoints]\nsign = \"not a url\"").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "share_batch_size = 2\n").unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.share_batch_size, 2);

        assert_matches!(
            BridgeConfig::load(dir.path().join("missing.toml")),
            Err(BridgeError::Invalid { .. })
        );
    }
}
