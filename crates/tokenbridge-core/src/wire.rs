//! Agent wire vocabulary
//!
//! Commands are single UTF-8 text frames. Responses are either text
//! (sentinels, keys, filenames, JSON arrays) or binary chunks. Raw frames are
//! decoded into [`AgentMessage`] exactly once, at the transport boundary, so
//! nothing downstream re-parses sentinel strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Completion sentinel: the artifact is finished
pub const COMPLETION_SENTINEL: &str = "99";
/// Generic abort; the caller should close whatever popup shows the operation
pub const CLOSE_POPUP_SENTINEL: &str = "0";
/// The agent no longer needs the download; stop without raising an error
pub const STOP_DOWNLOAD_SENTINEL: &str = "6789";
/// Certificate handshake rejection
pub const INVALID_CERT_SENTINEL: &str = "err: invalid cert";
/// Prefix for agent errors carrying a human-readable suffix
pub const ERROR_PREFIX: &str = "err:";

/// Frame written to the agent socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Encoded [`AgentCommand`]
    Text(String),
    /// Raw file bytes
    Binary(Vec<u8>),
}

impl OutboundFrame {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// True when the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Frame read from the agent socket, before sentinel decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
}

/// Routing target for keys shared outside the organisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTarget {
    /// Routing prefix understood by the agent
    pub prefix: String,
    /// External recipient identifier
    pub id: String,
}

/// Text commands understood by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Bind the session to a hardware certificate
    SetCertificate {
        /// Certificate blob as the backend stores it
        certificate: String,
    },
    /// Read the certificate from the inserted token
    GetCertificate,
    /// Download `source_url + artifact_name` and stream the decrypted result
    UrlDownload {
        /// Backend auth token forwarded to the agent
        auth_token: String,
        /// Base URL the artifact is served from
        source_url: String,
        /// Artifact name appended to the URL
        artifact_name: String,
        /// Owning document identifier
        document_id: String,
        /// Owning document type
        document_type: String,
    },
    /// Re-encrypt file keys for a batch of recipients
    GetFileIds {
        /// Backend auth token forwarded to the agent
        auth_token: String,
        /// Optional external routing
        external: Option<ExternalTarget>,
        /// Encrypted file names whose keys are shared
        file_names: Vec<String>,
        /// Recipient identifiers in this batch
        recipient_ids: Vec<String>,
    },
    /// Stream the result of the previous upload back
    GetFile,
}

impl AgentCommand {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetCertificate { .. } => "set-cer",
            Self::GetCertificate => "get-cer",
            Self::UrlDownload { .. } => "url-download",
            Self::GetFileIds { .. } => "get-file-ids",
            Self::GetFile => "get-file",
        }
    }

    /// Encode as the text frame sent to the agent
    pub fn encode(&self) -> String {
        match self {
            Self::SetCertificate { certificate } => format!("set-cer {}", quoted(certificate)),
            Self::GetCertificate => "get-cer".to_string(),
            Self::UrlDownload {
                auth_token,
                source_url,
                artifact_name,
                document_id,
                document_type,
            } => format!(
                "url-download {auth_token} {} {document_id} {document_type}",
                quoted(&format!("{source_url}{artifact_name}"))
            ),
            Self::GetFileIds {
                auth_token,
                external,
                file_names,
                recipient_ids,
            } => {
                let names = file_names
                    .iter()
                    .map(|name| urlencoding::encode(name).into_owned())
                    .collect::<Vec<_>>()
                    .join(",");
                let ids = recipient_ids.join(",");
                match external {
                    Some(target) => format!(
                        "get-file-ids {auth_token} {} {} {} {ids}",
                        target.prefix,
                        target.id,
                        quoted(&names)
                    ),
                    None => format!("get-file-ids {auth_token} {} {ids}", quoted(&names)),
                }
            }
            Self::GetFile => "get-file".to_string(),
        }
    }

    /// Encode into an outbound frame
    pub fn into_frame(self) -> OutboundFrame {
        OutboundFrame::Text(self.encode())
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "%22"))
}

/// Agent-side failure reasons carried by negative/`err:` sentinels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentFailure {
    /// `0` received where a transfer was expected to continue
    Aborted,
    /// `-1`: the agent lost its own connection
    ConnectionFailed,
    /// `-100`: the agent failed while processing the request
    ProcessingFailed,
    /// `-5`
    TokenNotPresent,
    /// `-7`
    PinRejected,
    /// `-10`
    CertificateNotFound,
    /// `-11`
    CertificateExpired,
    /// `-12`
    EncryptionFailed,
    /// `-13`
    DecryptionFailed,
    /// `-14`
    FileReadFailed,
    /// `-15`
    FileWriteFailed,
    /// `-16`
    DownloadFailed,
    /// `18`
    CancelledOnAgent,
    /// `err:<text>`
    Reported(String),
    /// Negative code outside the known table
    Unknown(i64),
}

impl AgentFailure {
    /// Map a numeric sentinel to a failure, if it is one
    pub fn from_code(code: i64) -> Option<Self> {
        let failure = match code {
            0 => Self::Aborted,
            -1 => Self::ConnectionFailed,
            -100 => Self::ProcessingFailed,
            -5 => Self::TokenNotPresent,
            -7 => Self::PinRejected,
            -10 => Self::CertificateNotFound,
            -11 => Self::CertificateExpired,
            -12 => Self::EncryptionFailed,
            -13 => Self::DecryptionFailed,
            -14 => Self::FileReadFailed,
            -15 => Self::FileWriteFailed,
            -16 => Self::DownloadFailed,
            18 => Self::CancelledOnAgent,
            other if other < 0 => Self::Unknown(other),
            _ => return None,
        };
        Some(failure)
    }

    /// Numeric wire code, when the failure has one
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Aborted => Some(0),
            Self::ConnectionFailed => Some(-1),
            Self::ProcessingFailed => Some(-100),
            Self::TokenNotPresent => Some(-5),
            Self::PinRejected => Some(-7),
            Self::CertificateNotFound => Some(-10),
            Self::CertificateExpired => Some(-11),
            Self::EncryptionFailed => Some(-12),
            Self::DecryptionFailed => Some(-13),
            Self::FileReadFailed => Some(-14),
            Self::FileWriteFailed => Some(-15),
            Self::DownloadFailed => Some(-16),
            Self::CancelledOnAgent => Some(18),
            Self::Reported(_) => None,
            Self::Unknown(code) => Some(*code),
        }
    }

    /// User-facing message
    pub fn message(&self) -> &str {
        match self {
            Self::Aborted => "The operation was aborted by the signing agent.",
            Self::ConnectionFailed => "The signing agent lost its connection.",
            Self::ProcessingFailed => "The signing agent could not process the request.",
            Self::TokenNotPresent => "No hardware token is inserted.",
            Self::PinRejected => "The token PIN was rejected.",
            Self::CertificateNotFound => "No certificate was found on the token.",
            Self::CertificateExpired => "The certificate on the token has expired.",
            Self::EncryptionFailed => "The file could not be encrypted.",
            Self::DecryptionFailed => "The file could not be decrypted with this token.",
            Self::FileReadFailed => "The signing agent could not read the file.",
            Self::FileWriteFailed => "The signing agent could not write the file.",
            Self::DownloadFailed => "The signing agent could not download the file.",
            Self::CancelledOnAgent => "The operation was cancelled in the signing agent.",
            Self::Reported(text) => text,
            Self::Unknown(_) => "The signing agent reported an unknown error.",
        }
    }
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{} (code {code})", self.message()),
            None => f.write_str(self.message()),
        }
    }
}

/// A decoded agent response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    /// One binary chunk of the artifact in flight
    Chunk(Vec<u8>),
    /// `99`
    Complete,
    /// `0`
    ClosePopup,
    /// `6789`
    StopDownload,
    /// `err: invalid cert`
    CertificateRejected,
    /// Any failure sentinel
    Failure(AgentFailure),
    /// Auxiliary payload: key token, filename, JSON array, acknowledgement
    Text(String),
}

impl AgentMessage {
    /// Decode a raw frame
    pub fn decode(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::Binary(bytes) => Self::Chunk(bytes),
            InboundFrame::Text(text) => Self::decode_text(text),
        }
    }

    /// Decode a text frame
    pub fn decode_text(text: String) -> Self {
        let trimmed = text.trim();
        match trimmed {
            COMPLETION_SENTINEL => return Self::Complete,
            CLOSE_POPUP_SENTINEL => return Self::ClosePopup,
            STOP_DOWNLOAD_SENTINEL => return Self::StopDownload,
            INVALID_CERT_SENTINEL => return Self::CertificateRejected,
            _ => {}
        }

        if let Some(reason) = trimmed.strip_prefix(ERROR_PREFIX) {
            return Self::Failure(AgentFailure::Reported(reason.trim().to_string()));
        }

        if let Some(failure) = trimmed.parse::<i64>().ok().and_then(AgentFailure::from_code) {
            return Self::Failure(failure);
        }

        Self::Text(text)
    }

    /// True for messages that end an exchange with an error
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_) | Self::CertificateRejected)
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk(_) => "chunk",
            Self::Complete => "complete",
            Self::ClosePopup => "close-popup",
            Self::StopDownload => "stop-download",
            Self::CertificateRejected => "certificate-rejected",
            Self::Failure(_) => "failure",
            Self::Text(_) => "text",
        }
    }
}
