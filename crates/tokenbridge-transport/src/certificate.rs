//! Certificate handshake
//!
//! Binds a session to the hardware certificate of the signed-in user. The
//! session refuses chunked transfers until [`CertificateValidator::validate`]
//! has resolved `true` on it.

use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokenbridge_core::{
    with_deadline, AgentCommand, AgentMessage, BridgeError, BridgeResult, Clock,
};
use tracing::{debug, info, warn};

/// Runs `set-cer` and `get-cer` exchanges
#[derive(Clone)]
pub struct CertificateValidator {
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CertificateValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateValidator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CertificateValidator {
    /// Validator that waits `timeout` for the handshake reply
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { timeout, clock }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the certificate and wait for the agent's verdict.
    ///
    /// `"err: invalid cert"` fails with [`BridgeError::CertificateRejected`];
    /// silence past the deadline fails with
    /// [`BridgeError::CertificateTimeout`]. Any other text reply validates
    /// the session. The session is closed on every error.
    pub async fn validate(&self, session: &mut Session, certificate: &str) -> BridgeResult<bool> {
        if certificate.trim().is_empty() {
            return Err(session
                .fail(BridgeError::certificate_rejected("no certificate on record"))
                .await);
        }

        session
            .send_command(AgentCommand::SetCertificate {
                certificate: certificate.to_string(),
            })
            .await?;

        let reply = match with_deadline(&*self.clock, self.timeout, session.receive()).await {
            Some(reply) => reply?,
            None => {
                warn!(
                    role = %session.role(),
                    session = %session.id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Certificate handshake timed out"
                );
                return Err(session
                    .fail(BridgeError::CertificateTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                    .await);
            }
        };

        match reply {
            AgentMessage::CertificateRejected => {
                warn!(role = %session.role(), session = %session.id(), "Certificate rejected by agent");
                Err(BridgeError::certificate_rejected(
                    "agent reported the certificate does not match the token",
                ))
            }
            AgentMessage::Failure(failure) => Err(BridgeError::transfer(failure)),
            other => {
                debug!(role = %session.role(), reply = other.kind(), "Certificate acknowledged");
                session.finish_exchange();
                session.mark_certificate_validated();
                info!(role = %session.role(), session = %session.id(), "Certificate validated");
                Ok(true)
            }
        }
    }

    /// Read the certificate currently on the token with `get-cer`
    pub async fn read_from_token(&self, session: &mut Session) -> BridgeResult<String> {
        session.send_command(AgentCommand::GetCertificate).await?;

        let reply = match with_deadline(&*self.clock, self.timeout, session.receive()).await {
            Some(reply) => reply?,
            None => {
                return Err(session
                    .fail(BridgeError::timeout(
                        "get-cer",
                        self.timeout.as_millis() as u64,
                    ))
                    .await)
            }
        };

        match reply {
            AgentMessage::Text(text) if !text.trim().is_empty() => {
                session.finish_exchange();
                Ok(text.trim().to_string())
            }
            AgentMessage::Failure(failure) => Err(BridgeError::transfer(failure)),
            AgentMessage::CertificateRejected => Err(BridgeError::certificate_rejected(
                "agent could not read a certificate from the token",
            )),
            other => Err(session
                .fail(BridgeError::protocol(format!(
                    "unexpected {} reply to get-cer",
                    other.kind()
                )))
                .await),
        }
    }
}
