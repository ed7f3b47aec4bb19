//! Encryption workflow
//!
//! # Protocol Flow
//!
//! ```text
//! ① connect encrypt role, set-cer handshake
//! ② per file, strictly in order: upload plaintext ─► chunks, key, "99"
//! ③ close the session
//! ④ backend: create comment + attachment records, upload each ciphertext
//! ⑤ key share per distinct recipient set
//! ```
//!
//! Files are never encrypted concurrently: the session carries one exchange
//! at a time and chunks carry no file id. A failure in ② aborts the batch
//! before anything reaches the backend. A failure in ④ deletes the created
//! comment; a failure in ⑤ also revokes the grants issued so far.

use crate::document::{
    AttachmentUpdate, Credentials, DocumentContext, DocumentService, EncryptedFile,
    NewEncryptedBatch, PersistedBatch, PersistedFile,
};
use crate::fanout::{KeyShareFanout, ShareOutcome};
use crate::transfer::{drive_transfer, AuxHandling, TransferEnd};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokenbridge_core::{
    AgentFailure, AgentRole, Artifact, BridgeError, BridgeResult, ChunkAssembler,
    ProgressReporter,
};
use tokenbridge_transport::{AgentBridge, CertificateValidator, Session};
use tracing::{error, info, warn};

/// Plaintext file selected for encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFile {
    /// Name shown to recipients
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PlainFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Result of a successful [`EncryptionOrchestrator::encrypt_and_persist`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionOutcome {
    /// Comment holding the encrypted attachments
    pub comment_id: String,
    pub files: Vec<PersistedFile>,
    /// Key grants issued for the files
    pub shares: ShareOutcome,
}

#[derive(Debug)]
struct EncryptedArtifact {
    artifact: Artifact,
    key: String,
}

/// Drives encryption, persistence and key sharing for one document
#[derive(Clone)]
pub struct EncryptionOrchestrator {
    bridge: AgentBridge,
    documents: Arc<dyn DocumentService>,
    validator: CertificateValidator,
    fanout: KeyShareFanout,
    reporter: ProgressReporter,
}

impl std::fmt::Debug for EncryptionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionOrchestrator")
            .field("bridge", &self.bridge)
            .field("progress", &self.reporter.current())
            .finish_non_exhaustive()
    }
}

impl EncryptionOrchestrator {
    /// Wire the orchestrator to a bridge, backend and progress reporter
    pub fn new(
        bridge: AgentBridge,
        documents: Arc<dyn DocumentService>,
        reporter: ProgressReporter,
    ) -> Self {
        let validator =
            CertificateValidator::new(bridge.config().certificate_timeout(), bridge.clock());
        let fanout = KeyShareFanout::new(bridge.clone(), Arc::clone(&documents));
        Self {
            bridge,
            documents,
            validator,
            fanout,
            reporter,
        }
    }

    /// Progress record updated while files upload
    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Encrypt `files`, attach them to `document` and share their keys.
    pub async fn encrypt_and_persist(
        &self,
        credentials: &Credentials,
        files: Vec<PlainFile>,
        document: &DocumentContext,
    ) -> BridgeResult<EncryptionOutcome> {
        if files.is_empty() {
            return Err(BridgeError::invalid("nothing to encrypt"));
        }

        let encrypted = self.encrypt_all(credentials, files).await?;
        let batch = self.persist(document, encrypted).await?;
        let shares = self.share_keys(credentials, &batch).await?;

        info!(
            object = %document.object_id,
            comment = %batch.comment_id,
            files = batch.files.len(),
            grants = shares.descriptors.len(),
            "Encrypted attachments persisted"
        );
        Ok(EncryptionOutcome {
            comment_id: batch.comment_id,
            files: batch.files,
            shares,
        })
    }

    async fn encrypt_all(
        &self,
        credentials: &Credentials,
        files: Vec<PlainFile>,
    ) -> BridgeResult<Vec<EncryptedArtifact>> {
        let mut session = self.bridge.connect(AgentRole::Encrypt).await?;
        let result = self.encrypt_on(&mut session, credentials, files).await;
        session.close().await;
        if result.is_err() {
            self.reporter.fail();
        }
        result
    }

    async fn encrypt_on(
        &self,
        session: &mut Session,
        credentials: &Credentials,
        files: Vec<PlainFile>,
    ) -> BridgeResult<Vec<EncryptedArtifact>> {
        self.validator
            .validate(session, &credentials.certificate)
            .await?;

        self.reporter.begin_operation(files.len());
        let mut assembler =
            ChunkAssembler::new(self.reporter.clone(), self.bridge.config().chunk_size_bytes);
        let mut encrypted = Vec::with_capacity(files.len());

        for (index, file) in files.into_iter().enumerate() {
            assembler.begin_transfer(index, file.file_name.as_str(), file.bytes.len() as u64)?;
            session.send_upload(file.bytes).await?;

            match drive_transfer(session, &mut assembler, AuxHandling::Collect).await? {
                TransferEnd::Completed { artifact, aux } => {
                    let Some(key) = aux.into_iter().rev().find(|value| !value.is_empty()) else {
                        return Err(session
                            .fail(BridgeError::protocol(format!(
                                "agent returned no key for {}",
                                artifact.file_name
                            )))
                            .await);
                    };
                    encrypted.push(EncryptedArtifact { artifact, key });
                }
                TransferEnd::ClosePopup | TransferEnd::StopDownload => {
                    warn!(file = %file.file_name, "Agent aborted encryption");
                    return Err(BridgeError::transfer(AgentFailure::Aborted));
                }
            }
        }

        Ok(encrypted)
    }

    async fn persist(
        &self,
        document: &DocumentContext,
        encrypted: Vec<EncryptedArtifact>,
    ) -> BridgeResult<PersistedBatch> {
        let request = NewEncryptedBatch {
            document: document.clone(),
            files: encrypted
                .iter()
                .map(|entry| EncryptedFile {
                    file_name: entry.artifact.file_name.clone(),
                    size_bytes: entry.artifact.len() as u64,
                    key: entry.key.clone(),
                })
                .collect(),
        };

        let batch = self
            .documents
            .create_encrypted_batch(request)
            .await
            .map_err(into_persistence)?;

        if batch.files.len() != encrypted.len() {
            self.rollback(&batch, false).await;
            return Err(BridgeError::persistence(format!(
                "backend created {} records for {} files",
                batch.files.len(),
                encrypted.len()
            )));
        }

        for (record, entry) in batch.files.iter().zip(encrypted) {
            let update = AttachmentUpdate {
                comment_id: batch.comment_id.clone(),
                file_id: record.file_id.clone(),
                bytes: entry.artifact.bytes,
            };
            if let Err(err) = self.documents.update_attachment(update).await {
                warn!(comment = %batch.comment_id, file = %record.file_id, error = %err, "Attachment upload rejected");
                self.rollback(&batch, false).await;
                return Err(into_persistence(err));
            }
        }

        Ok(batch)
    }

    async fn share_keys(
        &self,
        credentials: &Credentials,
        batch: &PersistedBatch,
    ) -> BridgeResult<ShareOutcome> {
        let mut groups: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
        for file in &batch.files {
            let mut recipients = file.recipient_ids.clone();
            recipients.sort();
            recipients.dedup();
            if recipients.is_empty() {
                continue;
            }
            groups
                .entry(recipients)
                .or_default()
                .push(file.file_name.clone());
        }

        let mut outcome = ShareOutcome::default();
        for (recipients, file_names) in &groups {
            match self
                .fanout
                .share(credentials, file_names, recipients, None)
                .await
            {
                Ok(shared) => {
                    outcome.batches += shared.batches;
                    outcome.partial |= shared.partial;
                    outcome.descriptors.extend(shared.descriptors);
                }
                Err(err) => {
                    self.rollback(batch, true).await;
                    return Err(err);
                }
            }
        }
        Ok(outcome)
    }

    /// Best-effort undo; failures are logged, the original error wins
    async fn rollback(&self, batch: &PersistedBatch, revoke_keys: bool) {
        if revoke_keys {
            let file_names: Vec<String> =
                batch.files.iter().map(|file| file.file_name.clone()).collect();
            let mut recipients: Vec<String> = batch
                .files
                .iter()
                .flat_map(|file| file.recipient_ids.iter().cloned())
                .collect();
            recipients.sort();
            recipients.dedup();

            if let Err(err) = self
                .documents
                .revoke_key_grants(&file_names, &recipients)
                .await
            {
                error!(comment = %batch.comment_id, error = %err, "Key grant revocation failed");
            }
        }

        if let Err(err) = self.documents.delete_batch(&batch.comment_id).await {
            error!(comment = %batch.comment_id, error = %err, "Rollback delete failed");
        } else {
            warn!(comment = %batch.comment_id, revoked = revoke_keys, "Encrypted batch rolled back");
        }
    }
}

fn into_persistence(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Persistence { .. } => err,
        other => BridgeError::persistence(other.to_string()),
    }
}
