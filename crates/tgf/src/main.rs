use std::sync::Arc;

use tracing::{info, warn};

use tgf_core::{
    audit::AuditLogger,
    config::Config,
    fetch::ContentFetcher,
    login::LoginManager,
    messaging::types::MessengerLimits,
    platform::Platform,
    security::FetchLimiter,
    service::BotService,
    store::{InMemoryStore, SessionStore},
};
use tgf_mtproto::MtprotoPlatform;
use tgf_store::HttpSessionStore;
use tgf_telegram::router::{build_messenger, new_bot, run_polling};

#[tokio::main]
async fn main() -> Result<(), tgf_core::Error> {
    tgf_core::logging::init("tgf")?;

    let cfg = Config::load()?;

    let store: Arc<dyn SessionStore> = match &cfg.session_store_url {
        Some(url) => {
            info!(url = %url, "using HTTP session store");
            Arc::new(HttpSessionStore::new(url.clone(), cfg.timeouts.store)?)
        }
        None => {
            warn!("SESSION_STORE_URL not set: sessions are kept in memory and lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };
    let platform: Arc<dyn Platform> =
        Arc::new(MtprotoPlatform::new(cfg.api_id, cfg.api_hash.clone()));

    let bot = new_bot(&cfg.telegram_bot_token);
    let messenger = build_messenger(
        bot.clone(),
        MessengerLimits {
            max_message_len: cfg.telegram_message_limit,
            max_caption_len: cfg.telegram_caption_limit,
        },
    );

    let login = Arc::new(LoginManager::new(
        platform.clone(),
        store.clone(),
        cfg.timeouts,
    ));
    let fetcher = Arc::new(ContentFetcher::new(
        platform,
        store.clone(),
        cfg.media_dir.clone(),
        cfg.timeouts,
    ));
    let service = Arc::new(BotService::new(
        login,
        fetcher,
        store,
        messenger,
        AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json),
        FetchLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ),
        cfg.telegram_allowed_users.clone(),
        cfg.timeouts,
    ));

    info!(
        allowed_users = cfg.telegram_allowed_users.len(),
        media_dir = %cfg.media_dir.display(),
        "starting bot"
    );

    run_polling(bot, service)
        .await
        .map_err(|e| tgf_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
