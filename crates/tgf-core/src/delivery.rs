//! Delivery normalizer: a fetched message becomes exactly one outgoing payload.

use std::path::PathBuf;

use crate::{fetch::FetchedMessage, platform::MediaKind};

/// Sent instead of an empty message so the transport always has something to send.
pub const NO_CONTENT_TEXT: &str = "ℹ️ This message has no text or media.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaPayload {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Possibly empty.
    pub caption: String,
    pub file_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media(MediaPayload),
}

/// Map a fetched message to a payload. Never carries both text and media.
///
/// With media, the caption falls back to the message text; it is cut to
/// `caption_limit` characters.
pub fn normalize(message: FetchedMessage, caption_limit: usize) -> Payload {
    let FetchedMessage {
        text,
        caption,
        media,
        ..
    } = message;

    match media {
        Some(blob) => {
            let caption = if caption.trim().is_empty() { text } else { caption };
            Payload::Media(MediaPayload {
                path: blob.path,
                kind: blob.kind,
                caption: truncate_chars(caption.trim(), caption_limit),
                file_name: blob.file_name,
            })
        }
        None => {
            let body = if text.trim().is_empty() { caption } else { text };
            if body.trim().is_empty() {
                Payload::Text(NO_CONTENT_TEXT.to_string())
            } else {
                Payload::Text(body)
            }
        }
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}
