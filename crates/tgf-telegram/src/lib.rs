//! Bot transport adapter (teloxide).
//!
//! Implements the core `MessagingPort` over the Telegram Bot API and routes
//! incoming updates into the core `BotService`.

use async_trait::async_trait;

use teloxide::{prelude::*, types::InputFile};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod router;

use tgf_core::{
    delivery::MediaPayload,
    domain::ChatId,
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessengerLimits},
    },
    platform::MediaKind,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    limits: MessengerLimits,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, limits: MessengerLimits) -> Self {
        Self { bot, limits }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        match e {
            teloxide::RequestError::Network(e) => Error::NetworkTransient(format!("telegram: {e}")),
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }

    async fn upload(&self, chat_id: ChatId, media: &MediaPayload) -> Result<()> {
        let chat = Self::tg_chat(chat_id);
        let mut file = InputFile::file(media.path.clone());
        if let Some(name) = &media.file_name {
            file = file.file_name(name.clone());
        }
        let caption = media.caption.clone();

        match media.kind {
            MediaKind::Photo => {
                self.with_retry(|| self.bot.send_photo(chat, file.clone()).caption(caption.clone()))
                    .await?;
            }
            MediaKind::Video => {
                self.with_retry(|| self.bot.send_video(chat, file.clone()).caption(caption.clone()))
                    .await?;
            }
            MediaKind::Animation => {
                self.with_retry(|| self.bot.send_animation(chat, file.clone()).caption(caption.clone()))
                    .await?;
            }
            MediaKind::Audio => {
                self.with_retry(|| self.bot.send_audio(chat, file.clone()).caption(caption.clone()))
                    .await?;
            }
            MediaKind::Voice => {
                self.with_retry(|| self.bot.send_voice(chat, file.clone()).caption(caption.clone()))
                    .await?;
            }
            MediaKind::Sticker => {
                // Stickers carry no caption; send it as a follow-up text.
                self.with_retry(|| self.bot.send_sticker(chat, file.clone()))
                    .await?;
                if !caption.is_empty() {
                    self.send_text(chat_id, &caption).await?;
                }
            }
            MediaKind::Document => {
                self.with_retry(|| self.bot.send_document(chat, file.clone()).caption(caption.clone()))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn limits(&self) -> MessengerLimits {
        self.limits
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;
        Ok(())
    }

    async fn send_media(&self, chat_id: ChatId, media: &MediaPayload) -> Result<()> {
        let sent = self.upload(chat_id, media).await;
        if let Err(e) = tokio::fs::remove_file(&media.path).await {
            warn!(path = %media.path.display(), error = %e, "failed to remove delivered media");
        }
        sent
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
            ChatAction::UploadPhoto => teloxide::types::ChatAction::UploadPhoto,
            ChatAction::UploadVideo => teloxide::types::ChatAction::UploadVideo,
            ChatAction::UploadVoice => teloxide::types::ChatAction::UploadVoice,
            ChatAction::UploadDocument => teloxide::types::ChatAction::UploadDocument,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(chat_id), tg_action))
            .await?;
        Ok(())
    }
}
