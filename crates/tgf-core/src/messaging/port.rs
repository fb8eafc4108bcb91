use async_trait::async_trait;

use crate::{
    delivery::MediaPayload,
    domain::ChatId,
    messaging::types::{ChatAction, MessengerLimits},
    Result,
};

/// Outbound side of the bot transport.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn limits(&self) -> MessengerLimits;

    /// `text` must already fit `limits().max_message_len`.
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;

    /// Sends the file at `media.path`. Implementations remove the file afterwards,
    /// whether or not the send succeeded.
    async fn send_media(&self, chat_id: ChatId, media: &MediaPayload) -> Result<()>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;
}
