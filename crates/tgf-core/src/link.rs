//! Share-link parsing.
//!
//! Pure functions only: no network I/O, no state. Two canonical forms are recognized:
//!
//! - `https://t.me/c/<rawChatId>/<messageId>` (private channel / supergroup)
//! - `https://t.me/<handle>/<messageId>` (public channel / group)

use std::fmt;

use crate::domain::MessageId;

/// Offset of the platform's supergroup/broadcast addressing convention.
///
/// A channel with bare id `N` is addressed as `-(10^12 + N)`. For a ten-digit `N`
/// that is the decimal string `-100` followed by `N`; shorter ids are zero-padded.
pub const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

const LINK_HOSTS: [&str; 2] = ["t.me", "telegram.me"];

/// Destination chat of a share link.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatRef {
    /// Platform-internal (marked) id, already transformed: `-(10^12 + raw)`.
    Internal(i64),
    /// Public handle, used verbatim.
    Handle(String),
}

impl ChatRef {
    /// Build the marked id for a bare channel id taken from a `/c/` link.
    pub fn from_raw_channel_id(raw: i64) -> Option<Self> {
        if raw <= 0 || raw >= CHANNEL_ID_OFFSET {
            return None;
        }
        Some(ChatRef::Internal(-(CHANNEL_ID_OFFSET + raw)))
    }

    /// Inverse of [`ChatRef::from_raw_channel_id`]: the bare channel id.
    pub fn bare_channel_id(&self) -> Option<i64> {
        match self {
            ChatRef::Internal(marked) => Some(-marked - CHANNEL_ID_OFFSET),
            ChatRef::Handle(_) => None,
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Internal(id) => write!(f, "{id}"),
            ChatRef::Handle(h) => write!(f, "@{h}"),
        }
    }
}

/// A parsed share link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareLink {
    pub chat: ChatRef,
    pub message_id: MessageId,
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat, self.message_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    /// Text does not contain a platform link at all; ordinary conversation.
    NotALink,
    /// Recognized link marker but the path does not address a message.
    Malformed(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotALink => write!(f, "not a link"),
            LinkError::Malformed(reason) => write!(f, "malformed link: {reason}"),
        }
    }
}

/// Whether `text` carries the platform link marker anywhere.
pub fn looks_like_link(text: &str) -> bool {
    find_link_token(text).is_some()
}

/// Parse a share link out of free text.
pub fn parse(text: &str) -> Result<ShareLink, LinkError> {
    let Some((_, path)) = find_link_token(text) else {
        return Err(LinkError::NotALink);
    };

    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');

    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    // `t.me/s/<handle>/<id>` is the web preview of the same message.
    if segments.len() > 2 && segments[0] == "s" {
        segments.remove(0);
    }

    let Some((last, head)) = segments.split_last() else {
        return Err(LinkError::Malformed("missing message id".to_string()));
    };
    let message_id = parse_message_id(last)?;

    if head.first() == Some(&"c") {
        // c/<chat>/<msg> or c/<chat>/<thread>/<msg>
        if !(2..=3).contains(&head.len()) {
            return Err(LinkError::Malformed("unexpected path shape".to_string()));
        }
        let raw = head[1];
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LinkError::Malformed(format!("invalid chat id `{raw}`")));
        }
        let chat = raw
            .parse::<i64>()
            .ok()
            .and_then(ChatRef::from_raw_channel_id)
            .ok_or_else(|| LinkError::Malformed(format!("chat id `{raw}` out of range")))?;
        return Ok(ShareLink { chat, message_id });
    }

    // <handle>/<msg> or <handle>/<thread>/<msg>
    if !(1..=2).contains(&head.len()) {
        return Err(LinkError::Malformed("unexpected path shape".to_string()));
    }
    let handle = head[0];
    if !is_valid_handle(handle) {
        return Err(LinkError::Malformed(format!("invalid handle `{handle}`")));
    }
    Ok(ShareLink {
        chat: ChatRef::Handle(handle.to_string()),
        message_id,
    })
}

/// Returns `(host, path-after-host)` of the first whitespace-separated token that is a
/// platform link.
fn find_link_token(text: &str) -> Option<(&str, &str)> {
    text.split_whitespace().find_map(|token| {
        let rest = strip_prefix_ci(token, "https://")
            .or_else(|| strip_prefix_ci(token, "http://"))
            .unwrap_or(token);
        let rest = strip_prefix_ci(rest, "www.").unwrap_or(rest);
        let (host, path) = rest.split_once('/')?;
        LINK_HOSTS
            .iter()
            .any(|h| host.eq_ignore_ascii_case(h))
            .then_some((host, path))
    })
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

fn parse_message_id(s: &str) -> Result<MessageId, LinkError> {
    match s.parse::<i32>() {
        Ok(id) if id > 0 && s.bytes().all(|b| b.is_ascii_digit()) => Ok(MessageId(id)),
        _ => Err(LinkError::Malformed(format!("invalid message id `{s}`"))),
    }
}

fn is_valid_handle(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}
