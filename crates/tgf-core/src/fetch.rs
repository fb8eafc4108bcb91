//! Content fetcher: share link → message fetched under the user's own identity.
//!
//! Stateless across calls. Each fetch loads the credential from the store, opens its
//! own connection and closes it before returning, whatever the outcome.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tracing::{debug, info, warn};

use crate::{
    config::Timeouts,
    domain::{MessageId, UserId},
    errors::Error,
    link::{ChatRef, ShareLink},
    platform::{Connection, MediaInfo, MediaKind, Platform, PlatformMessage},
    store::SessionStore,
    Result,
};

static MEDIA_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Media materialized on local disk. Ownership passes to the delivery step; the
/// transport deletes the file once it has been sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaBlob {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Original file name reported by the platform, if any.
    pub file_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedMessage {
    pub message_id: MessageId,
    pub text: String,
    pub caption: String,
    pub media: Option<MediaBlob>,
}

impl FetchedMessage {
    pub fn media_present(&self) -> bool {
        self.media.is_some()
    }
}

pub struct ContentFetcher {
    platform: Arc<dyn Platform>,
    store: Arc<dyn SessionStore>,
    media_dir: PathBuf,
    timeouts: Timeouts,
}

impl ContentFetcher {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn SessionStore>,
        media_dir: impl Into<PathBuf>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            platform,
            store,
            media_dir: media_dir.into(),
            timeouts,
        }
    }

    pub async fn fetch(&self, user: UserId, link: &ShareLink) -> Result<FetchedMessage> {
        let loaded = tokio::time::timeout(self.timeouts.store, self.store.load(user))
            .await
            .map_err(|_| Error::StoreUnavailable("store load timed out".to_string()))?;
        let Some(credential) = loaded? else {
            debug!(%user, "fetch without stored credential");
            return Err(Error::NotAuthenticated);
        };

        let mut connection = self.platform_call(self.platform.resume(&credential)).await?;
        let result = self.fetch_with(user, connection.as_mut(), link).await;
        connection.close().await;

        match &result {
            Ok(m) => info!(%user, %link, media = m.media_present(), "message fetched"),
            Err(e) => warn!(%user, %link, error = %e, "fetch failed"),
        }
        result
    }

    async fn fetch_with(
        &self,
        user: UserId,
        connection: &mut dyn Connection,
        link: &ShareLink,
    ) -> Result<FetchedMessage> {
        let message = self
            .platform_call(connection.get_message(&link.chat, link.message_id))
            .await?
            .ok_or(Error::NotFoundOrForbidden)?;

        let media = match &message.media {
            Some(info) => Some(self.materialize(user, connection, link, &message, info).await?),
            None => None,
        };

        Ok(FetchedMessage {
            message_id: message.id,
            text: message.text,
            caption: message.caption,
            media,
        })
    }

    /// Download into a `.part` file and rename only once complete, so a failed or
    /// interrupted download never leaves a truncated file behind.
    async fn materialize(
        &self,
        user: UserId,
        connection: &mut dyn Connection,
        link: &ShareLink,
        message: &PlatformMessage,
        info: &MediaInfo,
    ) -> Result<MediaBlob> {
        tokio::fs::create_dir_all(&self.media_dir).await?;
        let path = self.media_path(user, link, info);
        let part = part_path(&path);

        let downloaded =
            tokio::time::timeout(self.timeouts.download, connection.download_media(message, &part))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::NetworkTransient("media download timed out".to_string()))
                });

        let finished = match downloaded {
            Ok(()) => tokio::fs::rename(&part, &path).await.map_err(Error::Io),
            Err(e) => Err(e),
        };
        if let Err(e) = finished {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        Ok(MediaBlob {
            path,
            kind: info.kind,
            file_name: info.file_name.clone(),
        })
    }

    fn media_path(&self, user: UserId, link: &ShareLink, info: &MediaInfo) -> PathBuf {
        let ts = chrono::Utc::now().timestamp_millis();
        let n = MEDIA_COUNTER.fetch_add(1, Ordering::SeqCst);
        let chat = match &link.chat {
            ChatRef::Internal(id) => id.to_string(),
            ChatRef::Handle(h) => h.clone(),
        };
        let ext = info
            .file_name
            .as_deref()
            .and_then(extension_of)
            .unwrap_or_else(|| info.kind.default_extension().to_string());
        self.media_dir
            .join(format!("{user}_{chat}_{}_{ts}_{n}.{ext}", link.message_id))
    }

    async fn platform_call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeouts.platform, fut)
            .await
            .unwrap_or_else(|_| Err(Error::NetworkTransient("platform call timed out".to_string())))
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".part");
    PathBuf::from(s)
}

/// Lowercase alphanumeric extension of a platform file name, at most 8 chars.
fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
