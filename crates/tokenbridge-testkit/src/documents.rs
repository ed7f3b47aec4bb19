//! Recording backend double
//!
//! [`MockDocumentService`] keeps every call in memory and can be told to
//! fail specific operations, which is how rollback paths are exercised.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokenbridge_broker::{
    AttachmentDescriptor, AttachmentUpdate, DocumentContext, DocumentService, NewEncryptedBatch,
    PersistedBatch, PersistedFile, ShareDescriptor, UserCertificate,
};
use tokenbridge_core::{BridgeError, BridgeResult};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentOp {
    FetchAttachments,
    FetchCertificates,
    CreateBatch,
    UpdateAttachment,
    DeleteBatch,
    RecordGrant,
    RevokeGrants,
}

/// Everything the service was asked to do
#[derive(Debug, Clone, Default)]
pub struct DocumentCalls {
    pub created: Vec<NewEncryptedBatch>,
    pub updated: Vec<AttachmentUpdate>,
    pub deleted: Vec<String>,
    pub grants: Vec<ShareDescriptor>,
    pub revoked: Vec<(Vec<String>, Vec<String>)>,
}

#[derive(Debug, Default)]
struct State {
    attachments: HashMap<DocumentContext, Vec<AttachmentDescriptor>>,
    certificates: Vec<UserCertificate>,
    recipients: Vec<String>,
    failures: HashMap<DocumentOp, usize>,
    calls: DocumentCalls,
    next_comment: usize,
}

/// In-memory [`DocumentService`]
#[derive(Debug, Clone, Default)]
pub struct MockDocumentService {
    state: Arc<Mutex<State>>,
}

impl MockDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recipients attached to every persisted file
    pub fn with_recipients<I, S>(self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attachments(self, document: DocumentContext, attachments: Vec<AttachmentDescriptor>) -> Self {
        self.state.lock().attachments.insert(document, attachments);
        self
    }

    pub fn with_certificates(self, certificates: Vec<UserCertificate>) -> Self {
        self.state.lock().certificates = certificates;
        self
    }

    /// Fail `op` after it succeeded `after` times
    pub fn fail_after(&self, op: DocumentOp, after: usize) {
        self.state.lock().failures.insert(op, after);
    }

    /// Fail every call to `op`
    pub fn fail(&self, op: DocumentOp) {
        self.fail_after(op, 0);
    }

    pub fn calls(&self) -> DocumentCalls {
        self.state.lock().calls.clone()
    }

    fn check(state: &mut State, op: DocumentOp) -> BridgeResult<()> {
        match state.failures.get_mut(&op) {
            Some(0) => Err(BridgeError::persistence(format!("{op:?} rejected by backend"))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentService for MockDocumentService {
    async fn fetch_attachments(
        &self,
        document: &DocumentContext,
    ) -> BridgeResult<Vec<AttachmentDescriptor>> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::FetchAttachments)?;
        Ok(state.attachments.get(document).cloned().unwrap_or_default())
    }

    async fn fetch_certificates(
        &self,
        user_ids: &[String],
        org_ids: &[String],
    ) -> BridgeResult<Vec<UserCertificate>> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::FetchCertificates)?;
        Ok(state
            .certificates
            .iter()
            .filter(|entry| {
                user_ids.contains(&entry.user_id)
                    || entry
                        .org_id
                        .as_ref()
                        .is_some_and(|org| org_ids.contains(org))
            })
            .cloned()
            .collect())
    }

    async fn create_encrypted_batch(&self, batch: NewEncryptedBatch) -> BridgeResult<PersistedBatch> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::CreateBatch)?;

        let comment_id = format!("comment-{}", state.next_comment);
        state.next_comment += 1;
        let files = batch
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| PersistedFile {
                file_id: format!("{comment_id}-file-{index}"),
                file_name: format!("{comment_id}-{}", file.file_name),
                recipient_ids: state.recipients.clone(),
            })
            .collect();
        state.calls.created.push(batch);
        Ok(PersistedBatch { comment_id, files })
    }

    async fn update_attachment(&self, update: AttachmentUpdate) -> BridgeResult<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::UpdateAttachment)?;
        state.calls.updated.push(update);
        Ok(())
    }

    async fn delete_batch(&self, comment_id: &str) -> BridgeResult<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::DeleteBatch)?;
        state.calls.deleted.push(comment_id.to_string());
        Ok(())
    }

    async fn record_key_grant(&self, grant: &ShareDescriptor) -> BridgeResult<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::RecordGrant)?;
        state.calls.grants.push(grant.clone());
        Ok(())
    }

    async fn revoke_key_grants(
        &self,
        file_names: &[String],
        recipient_ids: &[String],
    ) -> BridgeResult<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, DocumentOp::RevokeGrants)?;
        state
            .calls
            .revoked
            .push((file_names.to_vec(), recipient_ids.to_vec()));
        Ok(())
    }
}
