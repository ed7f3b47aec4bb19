//! Recipient resolution
//!
//! Turns a user/org selection into the ids of users who can actually
//! receive a wrapped key: those the backend reports with a valid
//! certificate.

use crate::document::DocumentService;
use std::collections::HashSet;
use tokenbridge_core::BridgeResult;
use tracing::debug;

/// Deduplicated recipient ids, in backend order, that hold a valid
/// certificate
pub async fn resolve_recipients(
    documents: &dyn DocumentService,
    user_ids: &[String],
    org_ids: &[String],
) -> BridgeResult<Vec<String>> {
    if user_ids.is_empty() && org_ids.is_empty() {
        return Ok(Vec::new());
    }

    let certificates = documents.fetch_certificates(user_ids, org_ids).await?;
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    let mut skipped = 0usize;

    for entry in certificates {
        if !entry.can_receive_keys() {
            skipped += 1;
            continue;
        }
        if seen.insert(entry.user_id.clone()) {
            recipients.push(entry.user_id);
        }
    }

    debug!(
        recipients = recipients.len(),
        skipped,
        "Resolved key-share recipients"
    );
    Ok(recipients)
}
