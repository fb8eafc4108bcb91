use std::sync::Arc;

use tgf_core::messaging::types::{BotCommand, Requester};

use crate::router::AppState;

/// `/cmd@botname args` → (`cmd`, `args`). The name is lowercased.
fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(state: &Arc<AppState>, who: Requester, text: &str) {
    let (name, _args) = parse_command(text);
    let cmd = BotCommand::from_name(&name);

    match cmd {
        // Cancel must reach the login flow even while a step is waiting on the
        // network, so it never waits behind the user's queue.
        BotCommand::Cancel => run(state, who, cmd).await,
        // Login steps are ordered with the user's other login input.
        BotCommand::Login => {
            let state2 = Arc::clone(state);
            let user_id = who.user_id.0;
            state
                .queues
                .enqueue(user_id, Box::pin(async move { run(&state2, who, cmd).await }))
                .await;
        }
        BotCommand::Start | BotCommand::Help | BotCommand::Status | BotCommand::Unknown(_) => {
            run(state, who, cmd).await
        }
    }
}

async fn run(state: &AppState, who: Requester, cmd: BotCommand) {
    let label = format!("command {cmd:?}");
    if let Err(e) = state.service.command(&who, cmd).await {
        state.service.report_error(&who, &e, &label).await;
    }
}
