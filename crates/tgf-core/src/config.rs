use std::{env, fs, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Bounded timeouts for every outbound call.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    /// Any single call to the messaging platform (connect, code request, sign-in, lookup).
    pub platform: Duration,
    /// Any single save/load against the Session Store.
    pub store: Duration,
    /// A whole media download.
    pub download: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            platform: Duration::from_secs(30),
            store: Duration::from_secs(10),
            download: Duration::from_secs(300),
        }
    }
}

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Bot
    pub telegram_bot_token: String,
    /// Empty means everyone may use the bot.
    pub telegram_allowed_users: Vec<i64>,

    // Platform application credentials
    pub api_id: i32,
    pub api_hash: String,

    // Session store
    pub session_store_url: Option<String>,

    // Runtime
    pub timeouts: Timeouts,
    pub media_dir: PathBuf,

    // Limits
    pub telegram_message_limit: usize,
    pub telegram_caption_limit: usize,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Existing environment always wins over `.env`.
        let _ = dotenvy::dotenv();

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        let api_id = env_str("API_ID")
            .ok_or_else(|| Error::Config("API_ID environment variable is required".to_string()))?
            .trim()
            .parse::<i32>()
            .map_err(|e| Error::Config(format!("API_ID must be an integer: {e}")))?;
        let api_hash = env_str("API_HASH")
            .and_then(non_empty)
            .ok_or_else(|| Error::Config("API_HASH environment variable is required".to_string()))?;

        let session_store_url = env_str("SESSION_STORE_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string());

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            platform: env_millis("PLATFORM_TIMEOUT_MS").unwrap_or(defaults.platform),
            store: env_millis("STORE_TIMEOUT_MS").unwrap_or(defaults.store),
            download: env_millis("DOWNLOAD_TIMEOUT_MS").unwrap_or(defaults.download),
        };

        let media_dir =
            PathBuf::from(env_str("MEDIA_DIR").unwrap_or("/tmp/tgfetch-media".to_string()));
        fs::create_dir_all(&media_dir)?;

        let telegram_message_limit = env_usize("TELEGRAM_MESSAGE_LIMIT").unwrap_or(4096);
        let telegram_caption_limit = env_usize("TELEGRAM_CAPTION_LIMIT").unwrap_or(1024);

        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/tgfetch-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            api_id,
            api_hash,
            session_store_url,
            timeouts,
            media_dir,
            telegram_message_limit,
            telegram_caption_limit,
            audit_log_path,
            audit_log_json,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).filter(|ms| *ms > 0).map(Duration::from_millis)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
