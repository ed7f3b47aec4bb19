//! Unified error system for the agent bridge
//!
//! A single error enum covers every failure the broker can report. Each
//! variant belongs to exactly one [`ErrorCategory`], which is what callers
//! use to decide between prompting for the agent, asking for a different
//! token, or simply surfacing a message.

use crate::role::AgentRole;
use crate::wire::AgentFailure;
use serde::{Deserialize, Serialize};

/// Unified error type for all bridge operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BridgeError {
    /// The agent endpoint for a role did not open in time
    #[error("Agent unreachable: {role} endpoint did not open")]
    AgentUnreachable {
        /// Role whose endpoint could not be reached
        role: AgentRole,
    },

    /// A request was issued on a role that already has one in flight
    #[error("Busy: {role} session already has a request in flight")]
    Busy {
        /// Role whose session is occupied
        role: AgentRole,
    },

    /// The agent rejected the hardware certificate
    #[error("Certificate rejected: {message}")]
    CertificateRejected {
        /// Reason reported for the rejection
        message: String,
    },

    /// The agent never answered the certificate handshake
    #[error("Certificate validation timed out after {timeout_ms}ms")]
    CertificateTimeout {
        /// Handshake deadline in milliseconds
        timeout_ms: u64,
    },

    /// The agent reported a failure sentinel during an exchange
    #[error("Agent failure: {failure}")]
    Transfer {
        /// Decoded agent failure
        failure: AgentFailure,
    },

    /// The backend rejected persisted artifacts
    #[error("Persistence error: {message}")]
    Persistence {
        /// Error message describing the backend failure
        message: String,
    },

    /// Key sharing failed for at least one batch
    #[error("Key share failed after {completed_batches} completed batch(es): {message}")]
    KeyShare {
        /// Batches that finished before the failure
        completed_batches: usize,
        /// Error message describing the failing batch
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Timeout: {operation} after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// The agent or caller broke the exchange protocol
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// Error message describing the violation
        message: String,
    },

    /// The socket closed or failed underneath an exchange
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },
}

/// Error taxonomy used by callers to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Agent not running or not answering; prompt the user to start it
    Connectivity,
    /// Wrong or invalid hardware certificate
    Certificate,
    /// Agent-side failure while moving a file
    Transfer,
    /// Backend refused the encrypted artifacts
    Persistence,
    /// Deadline exceeded
    Timeout,
    /// Request discipline or wire format broken
    Protocol,
    /// Bad configuration or caller input
    Configuration,
}

impl BridgeError {
    /// Create an agent unreachable error
    pub fn unreachable(role: AgentRole) -> Self {
        Self::AgentUnreachable { role }
    }

    /// Create a busy error
    pub fn busy(role: AgentRole) -> Self {
        Self::Busy { role }
    }

    /// Create a certificate rejection error
    pub fn certificate_rejected(message: impl Into<String>) -> Self {
        Self::CertificateRejected {
            message: message.into(),
        }
    }

    /// Create a transfer error from a decoded agent failure
    pub fn transfer(failure: AgentFailure) -> Self {
        Self::Transfer { failure }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a key share error
    pub fn key_share(completed_batches: usize, message: impl Into<String>) -> Self {
        Self::KeyShare {
            completed_batches,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Taxonomy bucket for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AgentUnreachable { .. } | Self::Network { .. } => ErrorCategory::Connectivity,
            Self::CertificateRejected { .. } | Self::CertificateTimeout { .. } => {
                ErrorCategory::Certificate
            }
            Self::Transfer { .. } => ErrorCategory::Transfer,
            Self::Persistence { .. } | Self::KeyShare { .. } => ErrorCategory::Persistence,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Busy { .. } | Self::ProtocolViolation { .. } | Self::Serialization { .. } => {
                ErrorCategory::Protocol
            }
            Self::Invalid { .. } => ErrorCategory::Configuration,
        }
    }

    /// Message suitable for showing to the person at the keyboard
    pub fn user_message(&self) -> String {
        match self {
            Self::AgentUnreachable { .. } => {
                "The signing agent is not running. It is being started; please try again."
                    .to_string()
            }
            Self::CertificateRejected { .. } => {
                "The certificate on the token does not match your account.".to_string()
            }
            Self::CertificateTimeout { .. } => {
                "The signing agent did not confirm the certificate in time.".to_string()
            }
            Self::Transfer { failure } => failure.message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Standard Result type for bridge operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid(format!("config parse failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_failures_share_a_category_but_stay_distinct() {
        let rejected = BridgeError::certificate_rejected("invalid cert");
        let timed_out = BridgeError::CertificateTimeout { timeout_ms: 15_000 };

        assert_eq!(rejected.category(), ErrorCategory::Certificate);
        assert_eq!(timed_out.category(), ErrorCategory::Certificate);
        assert_ne!(rejected, timed_out);
    }

    #[test]
    fn transfer_errors_surface_agent_message() {
        let err = BridgeError::transfer(AgentFailure::TokenNotPresent);
        assert_eq!(err.category(), ErrorCategory::Transfer);
        assert_eq!(err.user_message(), AgentFailure::TokenNotPresent.message());
    }
}
