/// Core error type.
///
/// Adapter crates (store, platform, transport) map their specific errors into
/// this type so the core can decide between a corrective prompt, a "try again"
/// message and a "log in first" message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed phone, code or link. Local and user-correctable.
    #[error("input rejected: {0}")]
    InputRejected(String),

    /// Wrong or expired code / second factor.
    #[error("challenge failed: {0}")]
    ChallengeFailed(String),

    /// No stored credential, or the platform no longer accepts it.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The link resolved but the message is missing or inaccessible.
    #[error("message not found or not accessible")]
    NotFoundOrForbidden,

    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("network error: {0}")]
    NetworkTransient(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether the user can simply try the same thing again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::NetworkTransient(_) | Error::Io(_)
        )
    }

    /// Short user-facing text. Never includes internal details such as URLs or RPC names.
    pub fn user_message(&self) -> String {
        match self {
            Error::InputRejected(reason) => format!("❌ {reason}"),
            Error::ChallengeFailed(reason) => {
                format!("❌ Login failed: {reason}. Send /login to start over.")
            }
            Error::NotAuthenticated => {
                "🔒 You need to log in first. Send /login to connect your account.".to_string()
            }
            Error::NotFoundOrForbidden => {
                "🚫 That link doesn't work: the message doesn't exist or your account can't access it."
                    .to_string()
            }
            Error::StoreUnavailable(_) => {
                "⚠️ Session storage is unreachable right now. Please try again in a moment."
                    .to_string()
            }
            Error::NetworkTransient(_) | Error::Io(_) => {
                "⚠️ Temporary connection problem. Please try again.".to_string()
            }
            Error::Config(_) | Error::Json(_) | Error::External(_) => {
                "❌ Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
