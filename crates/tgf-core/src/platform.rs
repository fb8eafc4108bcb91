use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{Credential, MessageId},
    link::ChatRef,
    Result,
};

/// Outcome of a sign-in call that did not fail.
///
/// A required second factor is a continuation of the flow, not an error, so it is
/// modelled here instead of as an `Error` variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignIn {
    Authorized,
    PasswordRequired { hint: Option<String> },
}

/// Kind of media attached to a platform message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Audio,
    Voice,
    Sticker,
    Document,
}

impl MediaKind {
    /// Fallback file extension when the platform does not provide a file name.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video | MediaKind::Animation => "mp4",
            MediaKind::Audio => "mp3",
            MediaKind::Voice => "ogg",
            MediaKind::Sticker => "webp",
            MediaKind::Document => "bin",
        }
    }

    /// Classify by MIME type (documents carry most media kinds on the platform).
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime.unwrap_or_default() {
            "image/gif" => MediaKind::Animation,
            "audio/ogg" => MediaKind::Voice,
            "image/webp" | "application/x-tgsticker" | "video/webm" => MediaKind::Sticker,
            m if m.starts_with("image/") => MediaKind::Photo,
            m if m.starts_with("video/") => MediaKind::Video,
            m if m.starts_with("audio/") => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub file_name: Option<String>,
}

/// A message as returned by the platform, before any media is materialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformMessage {
    pub id: MessageId,
    pub text: String,
    pub caption: String,
    pub media: Option<MediaInfo>,
}

/// An open network connection to the messaging platform.
///
/// Each connection is exclusively owned by one login session or one fetch, and
/// must be released through [`Connection::close`] on every exit path. Dropping the
/// future of any call aborts that call.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Ask the platform to send a one-time code to `phone`. The pending login
    /// token is kept inside the connection.
    async fn request_code(&mut self, phone: &str) -> Result<()>;

    /// Sign in with the code received for the phone of the last `request_code`.
    ///
    /// Wrong/expired codes are `Error::ChallengeFailed`; connection problems are
    /// `Error::NetworkTransient`.
    async fn sign_in(&mut self, code: &str) -> Result<SignIn>;

    /// Answer a second-factor challenge raised by `sign_in`.
    async fn check_password(&mut self, password: &str) -> Result<()>;

    /// Serialize the authenticated session.
    async fn export_credential(&self) -> Result<Credential>;

    /// Resolve and fetch one message. `Ok(None)` when it does not exist or the
    /// account cannot see it.
    async fn get_message(
        &mut self,
        chat: &ChatRef,
        id: MessageId,
    ) -> Result<Option<PlatformMessage>>;

    /// Download the media of a message previously returned by `get_message` to `dest`.
    async fn download_media(&mut self, message: &PlatformMessage, dest: &Path) -> Result<()>;

    /// Release the connection.
    async fn close(self: Box<Self>);
}

/// Factory for platform connections.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Open a fresh, unauthenticated connection (start of a login flow).
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Open a connection authenticated with a stored credential.
    ///
    /// A credential the platform no longer accepts is `Error::NotAuthenticated`.
    async fn resume(&self, credential: &Credential) -> Result<Box<dyn Connection>>;
}
