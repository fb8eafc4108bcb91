use crate::{
    domain::{ChatId, UserId},
    platform::MediaKind,
};

/// Who sent an update, and where replies go.
#[derive(Clone, Debug)]
pub struct Requester {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
}

/// Bot commands understood by the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Login,
    Cancel,
    Status,
    Unknown(String),
}

impl BotCommand {
    /// `name` without the leading slash or `@botname` suffix.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "start" => BotCommand::Start,
            "help" => BotCommand::Help,
            "login" => BotCommand::Login,
            "cancel" => BotCommand::Cancel,
            "status" => BotCommand::Status,
            other => BotCommand::Unknown(other.to_string()),
        }
    }
}

/// Outgoing "chat action" shown while a fetch is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    UploadVideo,
    UploadVoice,
    UploadDocument,
}

impl ChatAction {
    pub fn for_media(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Photo => ChatAction::UploadPhoto,
            MediaKind::Video | MediaKind::Animation => ChatAction::UploadVideo,
            MediaKind::Voice | MediaKind::Audio => ChatAction::UploadVoice,
            MediaKind::Sticker | MediaKind::Document => ChatAction::UploadDocument,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MessengerLimits {
    pub max_message_len: usize,
    pub max_caption_len: usize,
}

impl Default for MessengerLimits {
    fn default() -> Self {
        Self {
            max_message_len: 4096,
            max_caption_len: 1024,
        }
    }
}
