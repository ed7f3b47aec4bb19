//! Agent endpoint roles
//!
//! The agent exposes one socket endpoint per role. Each role owns at most
//! one live session process-wide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed set of agent endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    /// Encrypt plaintext uploads and share file keys
    Encrypt,
    /// Decrypt a local ciphertext upload
    Decrypt,
    /// Download and decrypt a server-hosted artifact
    DecryptDownload,
    /// Document signing
    Sign,
    /// Read the certificate from the inserted token
    TokenCheck,
}

impl AgentRole {
    /// Every role, in endpoint table order
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Encrypt,
        AgentRole::Decrypt,
        AgentRole::DecryptDownload,
        AgentRole::Sign,
        AgentRole::TokenCheck,
    ];

    /// Wire/config name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::DecryptDownload => "decrypt-download",
            Self::Sign => "sign",
            Self::TokenCheck => "token-check",
        }
    }

    /// Dense index used for per-role tables
    pub fn index(&self) -> usize {
        match self {
            Self::Encrypt => 0,
            Self::Decrypt => 1,
            Self::DecryptDownload => 2,
            Self::Sign => 3,
            Self::TokenCheck => 4,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
