//! Telegram update handlers.
//!
//! Each handler:
//! - checks the allow-list
//! - picks how the update is scheduled (direct, per-user queue, or concurrent)
//! - hands the update to the core `BotService`

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tgf_core::{
    domain::{ChatId, UserId},
    messaging::types::Requester,
};

use crate::router::AppState;

mod commands;
mod text;

const TEXT_ONLY: &str = "Send me a message link (or /help). Other message types aren't supported.";

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let who = Requester {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
    };

    match state.service.authorize(&who).await {
        Ok(true) => {}
        Ok(false) => return Ok(()),
        Err(e) => {
            tracing::warn!(user = %who.user_id, error = %e, "authorization reply failed");
            return Ok(());
        }
    }

    let Some(text) = msg.text() else {
        let _ = state
            .service
            .messenger()
            .send_text(who.chat_id, TEXT_ONLY)
            .await;
        return Ok(());
    };

    if text.starts_with('/') {
        commands::handle_command(&state, who, text).await;
    } else {
        text::handle_text(&state, who, text).await;
    }
    Ok(())
}
