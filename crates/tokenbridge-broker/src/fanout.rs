//! Batched key sharing
//!
//! After encryption the per-file keys are re-wrapped by the agent for every
//! entitled recipient. The agent accepts at most three recipients per
//! command, so recipients are partitioned and each batch runs on its own
//! encrypt-role session.
//!
//! # Protocol Flow
//!
//! ```text
//! ┌──────────┐                        ┌──────────┐
//! │  Broker  │                        │  Agent   │
//! └──────────┘                        └──────────┘
//!      │ ① get-file-ids tok [pfx id] "names" ids│
//!      │───────────────────────────────────────►│
//!      │ ② JSON array, possibly in fragments    │
//!      │◄───────────────────────────────────────│
//!      │ ③ quiet period elapses (or hard cap)   │
//!      │ ④ record each descriptor via backend   │
//!      │ ⑤ close, next batch                    │
//! ```
//!
//! A batch ends when no fragment arrives for the quiet period, when the
//! agent closes the socket after its last fragment, on `99` or `6789`, or
//! at the hard cap. `0` aborts the batch.
//! Timeouts resolve with whatever descriptors parsed; only a batch with
//! nothing usable fails.

use crate::document::{Credentials, DocumentService, ShareDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokenbridge_core::{
    AgentCommand, AgentFailure, AgentMessage, AgentRole, BridgeError, BridgeResult,
    ExternalTarget, MAX_SHARE_BATCH,
};
use tokenbridge_transport::{AgentBridge, Session};
use tracing::{debug, info, warn};

// =============================================================================
// Batches
// =============================================================================

/// File names plus at most three recipients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShareBatch {
    /// Generated names of the files whose keys are shared
    pub file_names: Vec<String>,
    /// Recipients in this batch, never more than three
    pub recipient_ids: Vec<String>,
}

/// Split recipients into batches of `batch_size` (clamped to 1..=3), in
/// order: sizes `[b, b, …, remainder]`
pub fn partition(
    file_names: &[String],
    recipient_ids: &[String],
    batch_size: usize,
) -> Vec<KeyShareBatch> {
    let batch_size = batch_size.clamp(1, MAX_SHARE_BATCH);
    recipient_ids
        .chunks(batch_size)
        .map(|recipients| KeyShareBatch {
            file_names: file_names.to_vec(),
            recipient_ids: recipients.to_vec(),
        })
        .collect()
}

/// How a share call ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareOutcome {
    /// Batches issued to the agent
    pub batches: usize,
    /// Descriptors recorded through the backend
    pub descriptors: Vec<ShareDescriptor>,
    /// At least one batch ended on a timeout with partial data
    pub partial: bool,
}

/// Reply collected for one batch
#[derive(Debug)]
struct BatchReply {
    descriptors: Vec<ShareDescriptor>,
    timed_out: bool,
}

// =============================================================================
// KeyShareFanout
// =============================================================================

/// Runs `get-file-ids` batches and records the resulting grants
#[derive(Clone)]
pub struct KeyShareFanout {
    bridge: AgentBridge,
    documents: Arc<dyn DocumentService>,
}

impl std::fmt::Debug for KeyShareFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShareFanout")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl KeyShareFanout {
    pub fn new(bridge: AgentBridge, documents: Arc<dyn DocumentService>) -> Self {
        Self { bridge, documents }
    }

    /// Share the keys of `file_names` with `recipient_ids`.
    ///
    /// Batches run strictly one after another. The first failing batch
    /// fails the whole call with [`BridgeError::KeyShare`], reporting how
    /// many batches completed; completed batches are neither retried nor
    /// rolled back here.
    pub async fn share(
        &self,
        credentials: &Credentials,
        file_names: &[String],
        recipient_ids: &[String],
        external: Option<&ExternalTarget>,
    ) -> BridgeResult<ShareOutcome> {
        if file_names.is_empty() {
            return Err(BridgeError::invalid("key share needs at least one file"));
        }

        let batches = partition(file_names, recipient_ids, self.bridge.config().share_batch_size);
        let mut outcome = ShareOutcome::default();

        for (index, batch) in batches.iter().enumerate() {
            debug!(
                batch = index,
                recipients = batch.recipient_ids.len(),
                files = batch.file_names.len(),
                "Issuing key-share batch"
            );

            let reply = self
                .run_batch(credentials, batch, external)
                .await
                .map_err(|err| {
                    warn!(batch = index, completed = index, error = %err, "Key-share batch failed");
                    BridgeError::key_share(index, err.to_string())
                })?;
            outcome.batches += 1;
            outcome.partial |= reply.timed_out;

            for descriptor in reply.descriptors {
                self.documents
                    .record_key_grant(&descriptor)
                    .await
                    .map_err(|err| BridgeError::key_share(index, err.to_string()))?;
                outcome.descriptors.push(descriptor);
            }
        }

        info!(
            batches = outcome.batches,
            grants = outcome.descriptors.len(),
            partial = outcome.partial,
            "Key sharing complete"
        );
        Ok(outcome)
    }

    async fn run_batch(
        &self,
        credentials: &Credentials,
        batch: &KeyShareBatch,
        external: Option<&ExternalTarget>,
    ) -> BridgeResult<BatchReply> {
        let mut session = self.bridge.connect(AgentRole::Encrypt).await?;
        session
            .send_command(AgentCommand::GetFileIds {
                auth_token: credentials.auth_token.clone(),
                external: external.cloned(),
                file_names: batch.file_names.clone(),
                recipient_ids: batch.recipient_ids.clone(),
            })
            .await?;

        let reply = self.collect_reply(&mut session).await;
        session.close().await;
        reply
    }

    /// Gather fragments until quiet period, hangup or hard cap
    async fn collect_reply(&self, session: &mut Session) -> BridgeResult<BatchReply> {
        let config = self.bridge.config();
        let clock = self.bridge.clock();
        let quiet = config.share_quiet_period();
        let deadline = clock.now() + config.share_hard_timeout();
        let mut fragments: Vec<String> = Vec::new();
        let mut timed_out = false;

        loop {
            let now = clock.now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let remaining = deadline - now;
            let wait = if fragments.is_empty() {
                remaining
            } else {
                quiet.min(remaining)
            };

            match session.receive_within(wait).await {
                Ok(Some(AgentMessage::Text(text))) => fragments.push(text),
                Ok(Some(AgentMessage::Complete)) => break,
                Ok(Some(AgentMessage::Failure(failure))) => {
                    return Err(BridgeError::transfer(failure))
                }
                Ok(Some(AgentMessage::CertificateRejected)) => {
                    return Err(BridgeError::certificate_rejected(
                        "agent rejected the certificate while sharing keys",
                    ))
                }
                Ok(Some(AgentMessage::ClosePopup)) => {
                    warn!(fragments = fragments.len(), "Agent aborted key share");
                    return Err(BridgeError::transfer(AgentFailure::Aborted));
                }
                Ok(Some(AgentMessage::StopDownload)) => {
                    debug!(fragments = fragments.len(), "Agent stopped key share");
                    break;
                }
                Ok(Some(AgentMessage::Chunk(bytes))) => {
                    return Err(BridgeError::protocol(format!(
                        "binary chunk of {} bytes during key share",
                        bytes.len()
                    )))
                }
                Ok(None) if fragments.is_empty() => {}
                Ok(None) => {
                    timed_out = wait < quiet;
                    break;
                }
                Err(BridgeError::Network { .. }) if !fragments.is_empty() => break,
                Err(err) => return Err(err),
            }
        }

        let descriptors = parse_descriptors(&fragments)?;
        if descriptors.is_empty() && timed_out {
            return Err(BridgeError::timeout(
                "key share batch",
                config.share_hard_timeout_ms,
            ));
        }
        if timed_out {
            warn!(
                descriptors = descriptors.len(),
                hard_timeout_ms = config.share_hard_timeout_ms,
                "Key-share batch hit the hard timeout, keeping partial reply"
            );
        }
        Ok(BatchReply {
            descriptors,
            timed_out,
        })
    }
}

/// Parse the reply as one JSON array split across fragments, falling back
/// to one array per fragment. Fragments that are not arrays are skipped
/// as long as something parsed.
fn parse_descriptors(fragments: &[String]) -> BridgeResult<Vec<ShareDescriptor>> {
    if fragments.is_empty() {
        return Ok(Vec::new());
    }

    let joined: String = fragments.concat();
    if let Ok(descriptors) = serde_json::from_str::<Vec<ShareDescriptor>>(joined.trim()) {
        return Ok(descriptors);
    }

    let mut descriptors = Vec::new();
    let mut unparsed = 0usize;
    for fragment in fragments {
        match serde_json::from_str::<Vec<ShareDescriptor>>(fragment.trim()) {
            Ok(parsed) => descriptors.extend(parsed),
            Err(_) => unparsed += 1,
        }
    }

    if descriptors.is_empty() {
        return Err(BridgeError::protocol(format!(
            "key-share reply is not a descriptor array ({unparsed} fragments)"
        )));
    }
    if unparsed > 0 {
        debug!(unparsed, "Skipped key-share fragments that are not descriptor arrays");
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user-{i}")).collect()
    }

    #[test]
    fn seven_recipients_split_three_three_one() {
        let files = vec!["a.pdf".to_string(), "b.pdf".to_string()];
        let batches = partition(&files, &ids(7), 3);
        let sizes: Vec<usize> = batches.iter().map(|b| b.recipient_ids.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(batches.iter().all(|b| b.file_names == files));
    }

    #[test]
    fn oversized_batch_setting_is_clamped() {
        let batches = partition(&["a".to_string()], &ids(5), 10);
        assert!(batches.iter().all(|b| b.recipient_ids.len() <= MAX_SHARE_BATCH));
    }

    #[test]
    fn split_json_array_is_reassembled() {
        let fragments = vec![
            r#"[{"fileName":"a.pdf","recipientId":"u1","#.to_string(),
            r#""encryptedKey":"k1"}]"#.to_string(),
        ];
        let descriptors = parse_descriptors(&fragments).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].recipient_id, "u1");
    }

    #[test]
    fn per_fragment_arrays_are_merged() {
        let fragments = vec![
            r#"[{"fileName":"a.pdf","recipientId":"u1","encryptedKey":"k1"}]"#.to_string(),
            r#"[{"fileName":"a.pdf","recipientId":"u2","encryptedKey":"k2"}]"#.to_string(),
            "ok".to_string(),
        ];
        let descriptors = parse_descriptors(&fragments).unwrap();
        assert_eq!(descriptors.len(), 2);
    }

    #[test]
    fn garbage_reply_is_a_protocol_violation() {
        let fragments = vec!["not json".to_string()];
        assert!(matches!(
            parse_descriptors(&fragments),
            Err(BridgeError::ProtocolViolation { .. })
        ));
    }

    proptest! {
        #[test]
        fn partition_covers_every_recipient_once(n in 0usize..40, size in 1usize..=3) {
            let recipients = ids(n);
            let batches = partition(&["f".to_string()], &recipients, size);

            prop_assert_eq!(batches.len(), n.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.recipient_ids.is_empty() && b.recipient_ids.len() <= size));
            let flattened: Vec<String> = batches.into_iter().flat_map(|b| b.recipient_ids).collect();
            prop_assert_eq!(flattened, recipients);
        }
    }
}
