//! Canned agent behaviors for [`ScriptedAgent`](crate::ScriptedAgent)
//!
//! Each script turns into a responder closure. The encrypt script also
//! answers `get-file-ids`, since key sharing runs on the encrypt role.

use crate::agent::Reply;
use std::collections::HashMap;
use std::time::Duration;
use tokenbridge_core::{OutboundFrame, COMPLETION_SENTINEL, STOP_DOWNLOAD_SENTINEL};

type Responder = Box<dyn FnMut(usize, &OutboundFrame) -> Vec<Reply> + Send>;

/// Reversible stand-in for the agent's cipher
pub fn scramble(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|byte| byte ^ 0x5a).collect()
}

/// Key the encrypt script returns for upload number `index`
pub fn key_for(index: usize) -> String {
    format!("key-{index}")
}

/// Wrapped key the encrypt script returns for a file/recipient pair
pub fn wrapped_key(file_name: &str, recipient_id: &str) -> String {
    format!("wrapped-{file_name}-{recipient_id}")
}

/// Split a `get-file-ids` command into (file names, recipient ids)
pub fn parse_get_file_ids(command: &str) -> Option<(Vec<String>, Vec<String>)> {
    let rest = command.strip_prefix("get-file-ids ")?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let quoted = tokens.iter().find(|token| token.starts_with('"'))?;
    let names = quoted
        .trim_matches('"')
        .split(',')
        .filter(|name| !name.is_empty())
        .map(|name| {
            urlencoding::decode(name)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| name.to_string())
        })
        .collect();
    let ids = tokens
        .last()?
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    Some((names, ids))
}

/// JSON descriptor array for every file/recipient pair
pub fn descriptors_json(file_names: &[String], recipient_ids: &[String]) -> String {
    let descriptors: Vec<serde_json::Value> = file_names
        .iter()
        .flat_map(|name| {
            recipient_ids.iter().map(move |id| {
                serde_json::json!({
                    "fileName": name,
                    "recipientId": id,
                    "encryptedKey": wrapped_key(name, id),
                })
            })
        })
        .collect();
    serde_json::Value::Array(descriptors).to_string()
}

fn split_fragments(text: &str, fragments: usize) -> Vec<Reply> {
    let fragments = fragments.max(1);
    let step = text.len().div_ceil(fragments).max(1);
    text.as_bytes()
        .chunks(step)
        .map(|piece| Reply::Text(String::from_utf8_lossy(piece).into_owned()))
        .collect()
}

// =============================================================================
// Encrypt role
// =============================================================================

/// Behavior of the encrypt-role agent
#[derive(Debug, Clone)]
pub struct EncryptScript {
    /// Reply to `set-cer`
    pub certificate_reply: Option<String>,
    /// Bytes per returned chunk
    pub chunk_size: usize,
    /// Upload index that fails with the given sentinel after one chunk
    pub fail_upload: Option<(usize, String)>,
    /// Omit the key text after each upload
    pub omit_key: bool,
    /// Split each `get-file-ids` reply into this many text frames
    pub share_fragments: usize,
    /// Pause between share fragments
    pub share_fragment_gap: Duration,
    /// Hang up right after the last share fragment
    pub share_hangup: bool,
    /// Zero-based `get-file-ids` call that fails with the given sentinel
    pub fail_share: Option<(usize, String)>,
}

impl Default for EncryptScript {
    fn default() -> Self {
        Self {
            certificate_reply: Some("ok".to_string()),
            chunk_size: 1024,
            fail_upload: None,
            omit_key: false,
            share_fragments: 1,
            share_fragment_gap: Duration::ZERO,
            share_hangup: false,
            fail_share: None,
        }
    }
}

impl EncryptScript {
    pub fn into_responder(self) -> Responder {
        let mut uploads = 0usize;
        let mut shares = 0usize;

        Box::new(move |_connection: usize, frame: &OutboundFrame| match frame {
            OutboundFrame::Binary(bytes) => {
                let index = uploads;
                uploads += 1;
                let ciphertext = scramble(bytes);

                if let Some((failing, sentinel)) = &self.fail_upload {
                    if *failing == index {
                        let mut replies = Reply::chunks(&ciphertext, self.chunk_size);
                        replies.truncate(1);
                        replies.push(Reply::text(sentinel.clone()));
                        return replies;
                    }
                }

                let mut replies = Reply::chunks(&ciphertext, self.chunk_size);
                if !self.omit_key {
                    replies.push(Reply::Text(key_for(index)));
                }
                replies.push(Reply::text(COMPLETION_SENTINEL));
                replies
            }
            OutboundFrame::Text(text) if text.starts_with("set-cer") => self
                .certificate_reply
                .iter()
                .map(|reply| Reply::text(reply.clone()))
                .collect(),
            OutboundFrame::Text(text) if text.starts_with("get-file-ids") => {
                let call = shares;
                shares += 1;
                if let Some((failing, sentinel)) = &self.fail_share {
                    if *failing == call {
                        return vec![Reply::text(sentinel.clone())];
                    }
                }

                let Some((names, ids)) = parse_get_file_ids(text) else {
                    return vec![Reply::text("-100")];
                };
                let mut replies = Vec::new();
                for (position, fragment) in split_fragments(&descriptors_json(&names, &ids), self.share_fragments)
                    .into_iter()
                    .enumerate()
                {
                    if position > 0 && !self.share_fragment_gap.is_zero() {
                        replies.push(Reply::Delay(self.share_fragment_gap));
                    }
                    replies.push(fragment);
                }
                if self.share_hangup {
                    replies.push(Reply::Hangup);
                }
                replies
            }
            OutboundFrame::Text(_) => vec![Reply::text("-100")],
        })
    }
}

// =============================================================================
// Decrypt roles
// =============================================================================

/// Behavior of the decrypt and decrypt-download agents
#[derive(Debug, Clone)]
pub struct DecryptScript {
    /// Reply to `set-cer`
    pub certificate_reply: Option<String>,
    /// Bytes per returned chunk
    pub chunk_size: usize,
    /// Plaintext served by `url-download`, keyed by artifact name
    pub downloads: HashMap<String, Vec<u8>>,
    /// File the user "picks" for `get-file`
    pub local_file: Option<(String, Vec<u8>)>,
    /// Artifact names answered with one chunk then this sentinel
    pub interrupt: HashMap<String, String>,
}

impl Default for DecryptScript {
    fn default() -> Self {
        Self {
            certificate_reply: Some("ok".to_string()),
            chunk_size: 1024,
            downloads: HashMap::new(),
            local_file: None,
            interrupt: HashMap::new(),
        }
    }
}

impl DecryptScript {
    pub fn with_download(mut self, name: impl Into<String>, plaintext: Vec<u8>) -> Self {
        self.downloads.insert(name.into(), plaintext);
        self
    }

    /// Answer `name` with one chunk and `6789`
    pub fn stopping(mut self, name: impl Into<String>) -> Self {
        self.interrupt
            .insert(name.into(), STOP_DOWNLOAD_SENTINEL.to_string());
        self
    }

    /// Answer `name` with one chunk and `sentinel`
    pub fn interrupting(mut self, name: impl Into<String>, sentinel: impl Into<String>) -> Self {
        self.interrupt.insert(name.into(), sentinel.into());
        self
    }

    pub fn into_responder(self) -> Responder {
        Box::new(move |_connection: usize, frame: &OutboundFrame| {
            let Some(text) = frame_text(frame) else {
                return vec![Reply::text("-100")];
            };

            if text.starts_with("set-cer") {
                return self
                    .certificate_reply
                    .iter()
                    .map(|reply| Reply::text(reply.clone()))
                    .collect();
            }

            if text == "get-file" {
                return match &self.local_file {
                    Some((name, plaintext)) => {
                        let mut replies = vec![Reply::text(name.clone())];
                        replies.extend(Reply::chunks(plaintext, self.chunk_size));
                        replies.push(Reply::text(COMPLETION_SENTINEL));
                        replies
                    }
                    None => vec![Reply::text("0")],
                };
            }

            if text.starts_with("url-download") {
                let Some(target) = quoted_argument(text) else {
                    return vec![Reply::text("-100")];
                };
                let Some((name, plaintext)) = self
                    .downloads
                    .iter()
                    .find(|(name, _)| target.ends_with(name.as_str()))
                else {
                    return vec![Reply::text("-16")];
                };

                let mut replies = Reply::chunks(plaintext, self.chunk_size);
                match self.interrupt.get(name) {
                    Some(sentinel) => {
                        replies.truncate(1);
                        replies.push(Reply::text(sentinel.clone()));
                    }
                    None => replies.push(Reply::text(COMPLETION_SENTINEL)),
                }
                return replies;
            }

            vec![Reply::text("-100")]
        })
    }
}

fn frame_text(frame: &OutboundFrame) -> Option<&str> {
    match frame {
        OutboundFrame::Text(text) => Some(text),
        OutboundFrame::Binary(_) => None,
    }
}

fn quoted_argument(command: &str) -> Option<&str> {
    let start = command.find('"')?;
    let end = command[start + 1..].find('"')? + start + 1;
    Some(&command[start + 1..end])
}
