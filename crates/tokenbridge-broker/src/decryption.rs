//! Decryption workflows
//!
//! Downloads run on the decrypt-download role: the agent fetches the
//! ciphertext itself from `<sourceUrl><artifactName>` using the caller's
//! auth token and streams the plaintext back. Local files run on the
//! decrypt role through `get-file`, where the agent asks the user to pick
//! the file and names the result before the first chunk.
//!
//! Either way the agent may end the exchange early with `6789` (stop, the
//! result is no longer needed) or `0` (the caller should dismiss its
//! popup). Both tear the session down without an error.

use crate::document::{Credentials, DocumentContext, DocumentService};
use crate::transfer::{drive_transfer, AuxHandling, TransferEnd};
use std::sync::Arc;
use tokenbridge_core::{
    AgentCommand, AgentRole, Artifact, BridgeResult, ChunkAssembler,
    ProgressReporter,
};
use tokenbridge_transport::{AgentBridge, CertificateValidator, Session};
use tracing::{debug, info};

/// Name given to a `get-file` result until the agent names it
const UNNAMED_ARTIFACT: &str = "decrypted";

/// How a decryption ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Plaintext artifact
    Decrypted(Artifact),
    /// `6789`: the agent stopped the download
    Stopped,
    /// `0`: the caller should close its popup
    Dismissed,
}

impl DecryptOutcome {
    /// Plaintext, when the download completed
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::Decrypted(artifact) => Some(artifact),
            Self::Stopped | Self::Dismissed => None,
        }
    }

    pub fn into_artifact(self) -> Option<Artifact> {
        match self {
            Self::Decrypted(artifact) => Some(artifact),
            Self::Stopped | Self::Dismissed => None,
        }
    }

    fn from_end(end: TransferEnd) -> Self {
        match end {
            TransferEnd::Completed { artifact, .. } => Self::Decrypted(artifact),
            TransferEnd::StopDownload => Self::Stopped,
            TransferEnd::ClosePopup => Self::Dismissed,
        }
    }
}

/// One artifact to download and decrypt
#[derive(Debug, Clone, Copy)]
struct Download<'a> {
    index: usize,
    artifact_name: &'a str,
    source_url: &'a str,
    size_bytes: u64,
}

/// Drives download and local-file decryption
#[derive(Clone)]
pub struct DecryptionOrchestrator {
    bridge: AgentBridge,
    documents: Arc<dyn DocumentService>,
    validator: CertificateValidator,
    reporter: ProgressReporter,
}

impl std::fmt::Debug for DecryptionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionOrchestrator")
            .field("bridge", &self.bridge)
            .field("progress", &self.reporter.current())
            .finish_non_exhaustive()
    }
}

impl DecryptionOrchestrator {
    /// Wire the orchestrator to a bridge, backend and progress reporter
    pub fn new(
        bridge: AgentBridge,
        documents: Arc<dyn DocumentService>,
        reporter: ProgressReporter,
    ) -> Self {
        let validator =
            CertificateValidator::new(bridge.config().certificate_timeout(), bridge.clock());
        Self {
            bridge,
            documents,
            validator,
            reporter,
        }
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Download `<source_url><artifact_name>` through the agent and return
    /// the plaintext.
    ///
    /// `size_hint` is the ciphertext size when the caller knows it; without
    /// it progress reads 100 from the first chunk on.
    pub async fn fetch_and_decrypt(
        &self,
        credentials: &Credentials,
        artifact_name: &str,
        source_url: &str,
        size_hint: Option<u64>,
        document: &DocumentContext,
    ) -> BridgeResult<DecryptOutcome> {
        let mut session = self.open_validated(AgentRole::DecryptDownload, credentials).await?;
        self.reporter.begin_operation(1);

        let download = Download {
            index: 0,
            artifact_name,
            source_url,
            size_bytes: size_hint.unwrap_or(0),
        };
        let result = self
            .download_on(&mut session, credentials, document, download)
            .await;
        self.finish(&mut session, result).await
    }

    /// Decrypt every encrypted attachment of `document`, one after another
    /// on a single session. Stops after the first file the agent stops or
    /// dismisses; that outcome is the last entry.
    pub async fn decrypt_attachments(
        &self,
        credentials: &Credentials,
        document: &DocumentContext,
        source_url: &str,
    ) -> BridgeResult<Vec<DecryptOutcome>> {
        let attachments: Vec<_> = self
            .documents
            .fetch_attachments(document)
            .await?
            .into_iter()
            .filter(|attachment| attachment.encrypted)
            .collect();
        if attachments.is_empty() {
            debug!(object = %document.object_id, "No encrypted attachments");
            return Ok(Vec::new());
        }

        let mut session = self.open_validated(AgentRole::DecryptDownload, credentials).await?;
        self.reporter.begin_operation(attachments.len());

        let mut outcomes = Vec::with_capacity(attachments.len());
        for (index, attachment) in attachments.iter().enumerate() {
            let download = Download {
                index,
                artifact_name: &attachment.file_name,
                source_url,
                size_bytes: attachment.size_bytes.unwrap_or(0),
            };
            let outcome = match self
                .download_on(&mut session, credentials, document, download)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.reporter.fail();
                    session.close().await;
                    return Err(err);
                }
            };

            let stop = !matches!(outcome, DecryptOutcome::Decrypted(_));
            outcomes.push(outcome);
            if stop {
                break;
            }
        }

        session.close().await;
        info!(
            object = %document.object_id,
            decrypted = outcomes.iter().filter(|o| o.artifact().is_some()).count(),
            "Attachment decryption finished"
        );
        Ok(outcomes)
    }

    /// Let the agent pick an encrypted local file and return its plaintext
    pub async fn decrypt_file(&self, credentials: &Credentials) -> BridgeResult<DecryptOutcome> {
        let mut session = self.open_validated(AgentRole::Decrypt, credentials).await?;
        self.reporter.begin_operation(1);

        let result = self.local_file_on(&mut session).await;
        self.finish(&mut session, result).await
    }

    async fn open_validated(
        &self,
        role: AgentRole,
        credentials: &Credentials,
    ) -> BridgeResult<Session> {
        let mut session = self.bridge.connect(role).await?;
        if let Err(err) = self
            .validator
            .validate(&mut session, &credentials.certificate)
            .await
        {
            self.reporter.fail();
            return Err(err);
        }
        Ok(session)
    }

    async fn download_on(
        &self,
        session: &mut Session,
        credentials: &Credentials,
        document: &DocumentContext,
        download: Download<'_>,
    ) -> BridgeResult<DecryptOutcome> {
        let mut assembler =
            ChunkAssembler::new(self.reporter.clone(), self.bridge.config().chunk_size_bytes);
        assembler.begin_transfer(download.index, download.artifact_name, download.size_bytes)?;

        session
            .send_command(AgentCommand::UrlDownload {
                auth_token: credentials.auth_token.clone(),
                source_url: download.source_url.to_string(),
                artifact_name: download.artifact_name.to_string(),
                document_id: document.object_id.clone(),
                document_type: document.object_type.clone(),
            })
            .await?;

        let end = drive_transfer(session, &mut assembler, AuxHandling::Collect).await?;
        if let TransferEnd::Completed { aux, .. } = &end {
            if !aux.is_empty() {
                debug!(values = aux.len(), "Ignoring auxiliary values on download");
            }
        }
        Ok(DecryptOutcome::from_end(end))
    }

    async fn local_file_on(&self, session: &mut Session) -> BridgeResult<DecryptOutcome> {
        let mut assembler =
            ChunkAssembler::new(self.reporter.clone(), self.bridge.config().chunk_size_bytes);
        assembler.begin_transfer(0, UNNAMED_ARTIFACT, 0)?;
        session.send_command(AgentCommand::GetFile).await?;
        let end = drive_transfer(session, &mut assembler, AuxHandling::RenameArtifact).await?;
        Ok(DecryptOutcome::from_end(end))
    }

    async fn finish(
        &self,
        session: &mut Session,
        result: BridgeResult<DecryptOutcome>,
    ) -> BridgeResult<DecryptOutcome> {
        session.close().await;
        match &result {
            Ok(DecryptOutcome::Decrypted(artifact)) => {
                info!(role = %session.role(), file = %artifact.file_name, bytes = artifact.len(), "Decryption complete");
            }
            Ok(outcome) => {
                info!(role = %session.role(), outcome = ?outcome, "Decryption ended early");
            }
            Err(_) => self.reporter.fail(),
        }
        result
    }
}
