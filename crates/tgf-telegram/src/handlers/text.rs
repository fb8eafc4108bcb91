use std::sync::Arc;

use tracing::debug;

use tgf_core::{
    messaging::types::Requester,
    service::{route_text, TextRoute},
};

use crate::router::AppState;

pub async fn handle_text(state: &Arc<AppState>, who: Requester, text: &str) {
    match route_text(text) {
        // Fetches open their own connection and need no ordering.
        TextRoute::Fetch(link) => {
            let state = Arc::clone(state);
            tokio::spawn(async move {
                if let Err(e) = state.service.fetch(&who, &link).await {
                    state.service.report_error(&who, &e, "fetch delivery").await;
                }
            });
        }
        TextRoute::BadLink(err) => {
            if let Err(e) = state.service.bad_link(&who, &err).await {
                state.service.report_error(&who, &e, "link reply").await;
            }
        }
        TextRoute::Login => {
            debug!(user = %who.user_id, "queued login input");
            let state2 = Arc::clone(state);
            let text = text.to_string();
            let user_id = who.user_id.0;
            state
                .queues
                .enqueue(
                    user_id,
                    Box::pin(async move {
                        if let Err(e) = state2.service.login_input(&who, &text).await {
                            state2.service.report_error(&who, &e, "login reply").await;
                        }
                    }),
                )
                .await;
        }
    }
}
