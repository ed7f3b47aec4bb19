//! Chunked transfer driver shared by encryption and decryption
//!
//! Feeds session messages into a [`ChunkAssembler`] until the exchange
//! ends. The caller has already started the exchange (upload, `url-download`
//! or `get-file`) and called [`ChunkAssembler::begin_transfer`].

use tokenbridge_core::{AgentMessage, Artifact, BridgeError, BridgeResult, ChunkAssembler};
use tokenbridge_transport::Session;
use tracing::{debug, info};

/// What to do with auxiliary text frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxHandling {
    /// Hand every aux value back to the caller (encryption keys)
    Collect,
    /// Aux text before the first chunk names the artifact (`get-file`)
    RenameArtifact,
}

/// How a transfer exchange ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEnd {
    /// Completion sentinel with the reassembled artifact
    Completed { artifact: Artifact, aux: Vec<String> },
    /// `0`: the caller should close its popup
    ClosePopup,
    /// `6789`: the operation is no longer needed
    StopDownload,
}

/// Drive one transfer to its end.
///
/// Failure sentinels discard the partial artifact and surface as
/// [`BridgeError::Transfer`]; the session is already closed by then.
/// `0` and `6789` close the session cleanly.
pub async fn drive_transfer(
    session: &mut Session,
    assembler: &mut ChunkAssembler,
    aux_handling: AuxHandling,
) -> BridgeResult<TransferEnd> {
    let mut aux = Vec::new();

    loop {
        let message = match session.receive().await {
            Ok(message) => message,
            Err(err) => {
                assembler.abort();
                assembler.reporter().fail();
                return Err(err);
            }
        };

        match message {
            AgentMessage::Chunk(bytes) => {
                if let Err(err) = assembler.on_chunk(bytes) {
                    return Err(session.fail(err).await);
                }
            }
            AgentMessage::Complete => {
                let artifact = assembler.on_completion_sentinel()?;
                session.finish_exchange();
                info!(
                    role = %session.role(),
                    file = %artifact.file_name,
                    bytes = artifact.len(),
                    "Transfer complete"
                );
                return Ok(TransferEnd::Completed { artifact, aux });
            }
            AgentMessage::Text(text) => {
                let text = text.trim().to_string();
                debug!(role = %session.role(), "Auxiliary value received");
                match aux_handling {
                    AuxHandling::RenameArtifact if assembler.received_chunks() == 0 => {
                        assembler.rename(text);
                    }
                    _ => aux.push(text),
                }
            }
            AgentMessage::ClosePopup => {
                assembler.abort();
                session.close().await;
                return Ok(TransferEnd::ClosePopup);
            }
            AgentMessage::StopDownload => {
                assembler.abort();
                session.close().await;
                return Ok(TransferEnd::StopDownload);
            }
            AgentMessage::Failure(failure) => {
                return Err(assembler.on_error_sentinel(failure));
            }
            AgentMessage::CertificateRejected => {
                assembler.abort();
                assembler.reporter().fail();
                return Err(BridgeError::certificate_rejected(
                    "agent rejected the certificate during transfer",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;
    use tokenbridge_core::{
        AgentCommand, AgentFailure, AgentRole, BridgeConfig, ProgressReporter, TokioClock,
        CHUNK_SIZE_BYTES,
    };
    use tokenbridge_transport::{
        AgentBridge, AgentHandle, CertificateValidator, ConnectionState, MemoryConnector,
        NoopLauncher,
    };

    async fn validated_session(role: AgentRole) -> (AgentBridge, Session, AgentHandle) {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(role);
        let bridge = AgentBridge::new(
            BridgeConfig::testing(),
            Arc::new(connector),
            Arc::new(NoopLauncher),
            Arc::new(TokioClock),
        );
        let mut session = bridge.connect(role).await.unwrap();
        let mut agent = agents.recv().await.unwrap();

        let validator = CertificateValidator::new(Duration::from_secs(1), Arc::new(TokioClock));
        let (validated, _) = tokio::join!(validator.validate(&mut session, "MIIB"), async {
            agent.recv().await;
            agent.send_text("ok");
        });
        validated.unwrap();
        (bridge, session, agent)
    }

    #[tokio::test]
    async fn download_with_aux_name_and_chunks_completes() {
        let (_bridge, mut session, agent) = validated_session(AgentRole::Decrypt).await;
        let reporter = ProgressReporter::new();
        let mut assembler = ChunkAssembler::new(reporter.clone(), CHUNK_SIZE_BYTES);
        assembler.begin_transfer(0, "pending", 6).unwrap();
        session.send_command(AgentCommand::GetFile).await.unwrap();

        agent.send_text("contract.pdf");
        agent.send_binary(b"abc".to_vec());
        agent.send_binary(b"def".to_vec());
        agent.send_text("99");

        let end = drive_transfer(&mut session, &mut assembler, AuxHandling::RenameArtifact)
            .await
            .unwrap();
        assert_matches!(end, TransferEnd::Completed { artifact, aux } => {
            assert_eq!(artifact.file_name, "contract.pdf");
            assert_eq!(artifact.bytes, b"abcdef");
            assert!(aux.is_empty());
        });
        assert_eq!(reporter.current().current_progress, 100);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn failure_mid_transfer_discards_partial_artifact() {
        let (_bridge, mut session, agent) = validated_session(AgentRole::Encrypt).await;
        let reporter = ProgressReporter::new();
        let mut assembler = ChunkAssembler::new(reporter.clone(), CHUNK_SIZE_BYTES);
        assembler.begin_transfer(0, "a.txt", 8).unwrap();
        session.send_upload(vec![0; 8]).await.unwrap();

        agent.send_binary(vec![1; 4]);
        agent.send_text("-12");

        let result = drive_transfer(&mut session, &mut assembler, AuxHandling::Collect).await;
        assert_matches!(
            result,
            Err(BridgeError::Transfer { failure: AgentFailure::EncryptionFailed })
        );
        assert!(!assembler.is_receiving());
        assert!(reporter.current().error);
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn stop_download_tears_down_without_error() {
        let (_bridge, mut session, agent) = validated_session(AgentRole::DecryptDownload).await;
        let mut assembler = ChunkAssembler::new(ProgressReporter::new(), CHUNK_SIZE_BYTES);
        assembler.begin_transfer(0, "a.txt", 8).unwrap();
        session.send_command(AgentCommand::GetFile).await.unwrap();

        agent.send_binary(vec![1; 4]);
        agent.send_text("6789");

        let end = drive_transfer(&mut session, &mut assembler, AuxHandling::Collect)
            .await
            .unwrap();
        assert_eq!(end, TransferEnd::StopDownload);
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(!assembler.reporter().current().error);
    }
}
