//! Append-only audit trail of authorization, login and fetch outcomes.
//!
//! Never records phone numbers, codes, passwords or credentials.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::{domain::UserId, errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: &'static str,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &'static str, user: UserId, username: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event,
            user_id: user.0,
            username: username.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn auth(user: UserId, username: Option<&str>, authorized: bool) -> Self {
        Self {
            authorized: Some(authorized),
            ..Self::base("auth", user, username)
        }
    }

    /// `outcome` is a short label such as `code_sent` or `logged_in`.
    pub fn login(user: UserId, username: Option<&str>, outcome: &str) -> Self {
        Self {
            outcome: Some(outcome.to_string()),
            ..Self::base("login", user, username)
        }
    }

    pub fn fetch(
        user: UserId,
        username: Option<&str>,
        link: &str,
        result: std::result::Result<bool, &Error>,
    ) -> Self {
        let (outcome, media, error) = match result {
            Ok(media) => ("ok", Some(media), None),
            Err(e) => ("failed", None, Some(e.to_string())),
        };
        Self {
            outcome: Some(outcome.to_string()),
            link: Some(link.to_string()),
            media,
            error,
            ..Self::base("fetch", user, username)
        }
    }

    pub fn rate_limit(user: UserId, username: Option<&str>, retry_after: f64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", user, username)
        }
    }

    pub fn error(user: UserId, username: Option<&str>, error: &str, context: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            context: Some(context.to_string()),
            ..Self::base("error", user, username)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        for field in [&mut event.link, &mut event.error, &mut event.context] {
            if let Some(s) = field.as_deref() {
                *field = Some(truncate_text(s, AUDIT_MAX_TEXT));
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            writeln!(file, "{}", serde_json::to_string(&event)?)?;
            return Ok(());
        }

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External("audit event is not a JSON object".to_string()));
        };
        let mut out = format!("\n{}", "=".repeat(60));
        for (k, v) in obj {
            let shown = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("\n{k}: {shown}"));
        }
        out.push('\n');
        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Audit failures never fail the request; they are logged and dropped.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }
}

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
