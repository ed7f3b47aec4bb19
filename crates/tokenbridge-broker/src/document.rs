//! Backend document service collaborator
//!
//! The broker never talks to the backend directly; it consumes this trait.
//! Implementations wrap whatever REST client the embedding application
//! uses. Request and response shapes are serde types so adapters can map
//! them onto JSON payloads one-to-one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokenbridge_core::BridgeResult;

/// Who is asking: the backend auth token and the certificate the backend
/// has on record for the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Backend session token forwarded in agent commands
    pub auth_token: String,
    /// Certificate blob the session must be bound to
    pub certificate: String,
}

impl Credentials {
    /// Create credentials from a token and certificate
    pub fn new(auth_token: impl Into<String>, certificate: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            certificate: certificate.into(),
        }
    }
}

/// Document an attachment belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContext {
    /// Backend object identifier
    pub object_id: String,
    /// Backend object type, e.g. `memo`
    pub object_type: String,
}

impl DocumentContext {
    /// Create a document context
    pub fn new(object_id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            object_type: object_type.into(),
        }
    }
}

/// Attachment row as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    /// Attachment identifier
    pub file_id: String,
    /// Stored file name, appended to the download URL
    pub file_name: String,
    /// Stored size, when the backend reports it
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Whether the stored bytes are ciphertext
    #[serde(default)]
    pub encrypted: bool,
}

/// Certificate lookup result for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCertificate {
    /// User identifier
    pub user_id: String,
    /// Organisation the user was reached through
    #[serde(default)]
    pub org_id: Option<String>,
    /// Certificate blob, absent for users without a token
    #[serde(default)]
    pub certificate: Option<String>,
    /// Backend verdict (not revoked, not expired)
    #[serde(default)]
    pub valid: bool,
}

impl UserCertificate {
    /// Whether this user can receive encrypted keys
    pub fn can_receive_keys(&self) -> bool {
        self.valid
            && self
                .certificate
                .as_deref()
                .is_some_and(|cert| !cert.trim().is_empty())
    }
}

/// One encrypted file about to be persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFile {
    /// Original file name
    pub file_name: String,
    /// Ciphertext length
    pub size_bytes: u64,
    /// Key token the agent returned for this file
    pub key: String,
}

/// Create request for a comment carrying encrypted attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEncryptedBatch {
    /// Document the comment is attached to
    pub document: DocumentContext,
    /// Files in upload order
    pub files: Vec<EncryptedFile>,
}

/// Server-side record of one persisted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFile {
    /// Attachment record identifier
    pub file_id: String,
    /// Generated name the agent must use when sharing keys
    pub file_name: String,
    /// Users entitled to the key
    pub recipient_ids: Vec<String>,
}

/// Result of [`DocumentService::create_encrypted_batch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedBatch {
    /// Comment created for the batch; the rollback handle
    pub comment_id: String,
    /// Records in the order of [`NewEncryptedBatch::files`]
    pub files: Vec<PersistedFile>,
}

/// Ciphertext upload into an existing attachment record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpdate {
    /// Owning comment
    pub comment_id: String,
    /// Record created by the batch
    pub file_id: String,
    /// Ciphertext
    pub bytes: Vec<u8>,
}

/// One key grant returned by the agent from `get-file-ids`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareDescriptor {
    /// Generated file name the key belongs to
    pub file_name: String,
    /// Recipient the key was wrapped for
    pub recipient_id: String,
    /// Key wrapped for the recipient's certificate
    pub encrypted_key: String,
}

/// Backend operations the broker depends on
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Attachments of a document
    async fn fetch_attachments(
        &self,
        document: &DocumentContext,
    ) -> BridgeResult<Vec<AttachmentDescriptor>>;

    /// Certificates of the given users and of every member of the given orgs
    async fn fetch_certificates(
        &self,
        user_ids: &[String],
        org_ids: &[String],
    ) -> BridgeResult<Vec<UserCertificate>>;

    /// Create the comment and its attachment records
    async fn create_encrypted_batch(&self, batch: NewEncryptedBatch) -> BridgeResult<PersistedBatch>;

    /// Store ciphertext for an attachment record created by
    /// [`create_encrypted_batch`](Self::create_encrypted_batch)
    async fn update_attachment(&self, update: AttachmentUpdate) -> BridgeResult<()>;

    /// Remove a comment and its attachments (rollback)
    async fn delete_batch(&self, comment_id: &str) -> BridgeResult<()>;

    /// Record a key grant produced by key sharing
    async fn record_key_grant(&self, grant: &ShareDescriptor) -> BridgeResult<()>;

    /// Revoke key grants for these files and recipients (rollback)
    async fn revoke_key_grants(
        &self,
        file_names: &[String],
        recipient_ids: &[String],
    ) -> BridgeResult<()>;
}
