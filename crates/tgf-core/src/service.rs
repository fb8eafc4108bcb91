//! Application service: the bot's behavior between the transport and the core.
//!
//! The transport decides scheduling (ordered per user, cancel bypass, concurrent
//! fetches); this service decides what each update means and what gets sent back.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::Timeouts,
    delivery::{self, Payload},
    domain::UserId,
    errors::Error,
    fetch::ContentFetcher,
    link::{self, LinkError, ShareLink},
    login::{LoginManager, LoginReply, LoginState, LoginStatus},
    messaging::{
        port::MessagingPort,
        split_text,
        types::{BotCommand, ChatAction, Requester},
    },
    security::{is_authorized, Admission, FetchLimiter},
    store::SessionStore,
    Result,
};

pub const UNAUTHORIZED_TEXT: &str = "Unauthorized. Contact the bot owner for access.";

const HELP_TEXT: &str = "📥 Send me a link to a Telegram message and I'll fetch it with your own account.\n\
\n\
Supported links:\n\
• https://t.me/<channel>/<id>\n\
• https://t.me/c/<chat>/<id> (private chats you are a member of)\n\
\n\
Commands:\n\
/login - connect your Telegram account\n\
/cancel - abort a login in progress\n\
/status - show login state\n\
/help - this message";

/// How the transport should schedule a free-text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextRoute {
    /// A share link: fetch it, concurrently with anything else.
    Fetch(ShareLink),
    /// Looked like a link but could not be parsed.
    BadLink(LinkError),
    /// Anything else belongs to the user's login flow, in order.
    Login,
}

pub fn route_text(text: &str) -> TextRoute {
    match link::parse(text) {
        Ok(l) => TextRoute::Fetch(l),
        Err(LinkError::NotALink) => TextRoute::Login,
        Err(e) => TextRoute::BadLink(e),
    }
}

pub struct BotService {
    login: Arc<LoginManager>,
    fetcher: Arc<ContentFetcher>,
    store: Arc<dyn SessionStore>,
    messenger: Arc<dyn MessagingPort>,
    audit: AuditLogger,
    limiter: FetchLimiter,
    allowed_users: Vec<i64>,
    timeouts: Timeouts,
}

impl BotService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        login: Arc<LoginManager>,
        fetcher: Arc<ContentFetcher>,
        store: Arc<dyn SessionStore>,
        messenger: Arc<dyn MessagingPort>,
        audit: AuditLogger,
        limiter: FetchLimiter,
        allowed_users: Vec<i64>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            login,
            fetcher,
            store,
            messenger,
            audit,
            limiter,
            allowed_users,
            timeouts,
        }
    }

    pub fn messenger(&self) -> &Arc<dyn MessagingPort> {
        &self.messenger
    }

    /// Allow-list check. Unauthorized users get a fixed reply and `false`.
    pub async fn authorize(&self, who: &Requester) -> Result<bool> {
        let ok = is_authorized(Some(who.user_id), &self.allowed_users);
        if !ok {
            self.audit.record(AuditEvent::auth(
                who.user_id,
                who.username.as_deref(),
                false,
            ));
            warn!(user = %who.user_id, "unauthorized access attempt");
            self.reply(who, UNAUTHORIZED_TEXT).await?;
        }
        Ok(ok)
    }

    pub async fn command(&self, who: &Requester, cmd: BotCommand) -> Result<()> {
        match cmd {
            BotCommand::Start | BotCommand::Help => self.reply(who, HELP_TEXT).await,
            BotCommand::Login => {
                let reply = self.login.start(who.user_id).await;
                self.login_reply(who, reply).await
            }
            BotCommand::Cancel => {
                let reply = self.login.cancel(who.user_id).await;
                self.login_reply(who, reply).await
            }
            BotCommand::Status => self.status(who).await,
            BotCommand::Unknown(name) => {
                self.reply(who, &format!("❓ Unknown command /{name}. Send /help for usage."))
                    .await
            }
        }
    }

    /// Phone, code or password input for the user's login flow.
    pub async fn login_input(&self, who: &Requester, text: &str) -> Result<()> {
        let reply = self.login.input(who.user_id, text).await;
        self.login_reply(who, reply).await
    }

    pub async fn bad_link(&self, who: &Requester, err: &LinkError) -> Result<()> {
        self.reply(who, &format!("❌ Invalid link: {err}")).await
    }

    /// Fetch a shared message and deliver it to the requester's chat.
    pub async fn fetch(&self, who: &Requester, link: &ShareLink) -> Result<()> {
        if let Admission::Limited { retry_after } = self.limiter.admit(who.user_id) {
            let secs = retry_after.as_secs_f64();
            self.audit.record(AuditEvent::rate_limit(
                who.user_id,
                who.username.as_deref(),
                secs,
            ));
            return self
                .reply(
                    who,
                    &format!("⏳ Rate limited. Please wait {:.0} seconds.", secs.ceil()),
                )
                .await;
        }

        info!(user = %who.user_id, %link, "fetch requested");
        let _ = self
            .messenger
            .send_chat_action(who.chat_id, ChatAction::Typing)
            .await;

        let fetched = self.fetcher.fetch(who.user_id, link).await;
        self.audit.record(AuditEvent::fetch(
            who.user_id,
            who.username.as_deref(),
            &link.to_string(),
            fetched.as_ref().map(|m| m.media_present()),
        ));

        let message = match fetched {
            Ok(m) => m,
            Err(e) => return self.reply(who, &e.user_message()).await,
        };

        let payload = delivery::normalize(message, self.messenger.limits().max_caption_len);
        self.deliver(who, payload).await
    }

    pub async fn deliver(&self, who: &Requester, payload: Payload) -> Result<()> {
        match payload {
            Payload::Text(text) => self.reply(who, &text).await,
            Payload::Media(media) => {
                let _ = self
                    .messenger
                    .send_chat_action(who.chat_id, ChatAction::for_media(media.kind))
                    .await;
                self.messenger.send_media(who.chat_id, &media).await
            }
        }
    }

    /// Send an error to the user and audit it. Used by the transport for failures
    /// that escaped a handler.
    pub async fn report_error(&self, who: &Requester, err: &Error, context: &str) {
        self.audit.record(AuditEvent::error(
            who.user_id,
            who.username.as_deref(),
            &err.to_string(),
            context,
        ));
        if let Err(e) = self.reply(who, &err.user_message()).await {
            warn!(user = %who.user_id, error = %e, "failed to report error to user");
        }
    }

    async fn status(&self, who: &Requester) -> Result<()> {
        let flow = match self.login.status(who.user_id).await {
            LoginStatus::Idle => "no login in progress",
            LoginStatus::Busy => "login step running",
            LoginStatus::InProgress(LoginState::AwaitingPhone) => "waiting for your phone number",
            LoginStatus::InProgress(LoginState::AwaitingCode) => "waiting for the login code",
            LoginStatus::InProgress(LoginState::AwaitingPassword) => {
                "waiting for your 2FA password"
            }
        };
        let account = match self.stored_session(who.user_id).await {
            Ok(true) => "✅ connected",
            Ok(false) => "❌ not connected (send /login)",
            Err(_) => "⚠️ unknown (session storage unreachable)",
        };
        self.reply(who, &format!("📊 Status\n\nAccount: {account}\nLogin: {flow}"))
            .await
    }

    async fn stored_session(&self, user: UserId) -> Result<bool> {
        let loaded = tokio::time::timeout(self.timeouts.store, self.store.load(user))
            .await
            .map_err(|_| Error::StoreUnavailable("store load timed out".to_string()))?;
        Ok(loaded?.is_some())
    }

    async fn login_reply(&self, who: &Requester, reply: LoginReply) -> Result<()> {
        if let Some(outcome) = audit_outcome(&reply) {
            self.audit.record(AuditEvent::login(
                who.user_id,
                who.username.as_deref(),
                outcome,
            ));
        }
        match render_login_reply(reply) {
            Some(text) => self.reply(who, &text).await,
            None => Ok(()),
        }
    }

    async fn reply(&self, who: &Requester, text: &str) -> Result<()> {
        for chunk in split_text(text, self.messenger.limits().max_message_len) {
            self.messenger.send_text(who.chat_id, &chunk).await?;
        }
        Ok(())
    }
}

fn audit_outcome(reply: &LoginReply) -> Option<&'static str> {
    Some(match reply {
        LoginReply::AskPhone => "started",
        LoginReply::Restarted => "restarted",
        LoginReply::CodeSent { .. } => "code_sent",
        LoginReply::PasswordRequired { .. } => "second_factor",
        LoginReply::LoggedIn => "logged_in",
        LoginReply::LoggedInNotSaved(_) => "logged_in_not_saved",
        LoginReply::Failed(_) => "failed",
        LoginReply::Cancelled => "cancelled",
        LoginReply::InvalidPhone
        | LoginReply::InvalidCode
        | LoginReply::NothingToCancel
        | LoginReply::NotInProgress
        | LoginReply::Interrupted => return None,
    })
}

/// User-facing text for a login step. `None` means nothing is sent.
pub fn render_login_reply(reply: LoginReply) -> Option<String> {
    let text = match reply {
        LoginReply::AskPhone => {
            "📱 Send your phone number in international format, e.g. +15551234567.".to_string()
        }
        LoginReply::Restarted => {
            "🔄 Previous login attempt discarded. Send your phone number, e.g. +15551234567."
                .to_string()
        }
        LoginReply::InvalidPhone => {
            "❌ That doesn't look like a phone number. Use international format, e.g. +15551234567."
                .to_string()
        }
        LoginReply::CodeSent { masked_phone } => format!(
            "📨 Code sent to {masked_phone}.\n\nSend it with spaces between the digits (e.g. 1 2 3 4 5) so Telegram doesn't invalidate it."
        ),
        LoginReply::InvalidCode => {
            "❌ The code should be 4 to 8 digits. Try again, or /cancel.".to_string()
        }
        LoginReply::PasswordRequired { hint } => match hint {
            Some(h) if !h.is_empty() => {
                format!("🔐 Two-step verification is on. Send your password (hint: {h}).")
            }
            _ => "🔐 Two-step verification is on. Send your password.".to_string(),
        },
        LoginReply::LoggedIn => {
            "✅ Logged in. Send me a message link to fetch it.".to_string()
        }
        LoginReply::LoggedInNotSaved(e) => format!(
            "⚠️ Login succeeded, but the session could not be saved ({}). Send /login to try again.",
            short_reason(&e)
        ),
        LoginReply::Failed(e) => e.user_message(),
        LoginReply::Cancelled => "🛑 Login cancelled.".to_string(),
        LoginReply::NothingToCancel => "Nothing to cancel.".to_string(),
        LoginReply::NotInProgress => {
            "ℹ️ No login in progress. Send /login to connect your account, or send a message link."
                .to_string()
        }
        LoginReply::Interrupted => return None,
    };
    Some(text)
}

fn short_reason(e: &Error) -> &'static str {
    match e {
        Error::StoreUnavailable(_) => "storage unreachable",
        Error::NetworkTransient(_) | Error::Io(_) => "connection problem",
        _ => "unexpected error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, Credential},
        messaging::types::MessengerLimits,
        platform::MediaKind,
        store::InMemoryStore,
        testing::{
            photo_message, text_message, FakePlatform, RecordingMessenger, Script, Sent,
            CREDENTIAL, VALID_CODE,
        },
    };
    use std::{path::PathBuf, time::Duration};

    struct Harness {
        service: BotService,
        messenger: Arc<RecordingMessenger>,
        platform: Arc<FakePlatform>,
        store: Arc<InMemoryStore>,
        audit_path: PathBuf,
    }

    fn who(user: i64) -> Requester {
        Requester {
            chat_id: ChatId(user),
            user_id: UserId(user),
            username: Some(format!("user{user}")),
        }
    }

    fn harness(name: &str, script: Script, allowed: Vec<i64>, limiter: FetchLimiter) -> Harness {
        harness_with(name, script, allowed, limiter, RecordingMessenger::default())
    }

    fn harness_with(
        name: &str,
        script: Script,
        allowed: Vec<i64>,
        limiter: FetchLimiter,
        messenger: RecordingMessenger,
    ) -> Harness {
        let timeouts = Timeouts {
            platform: Duration::from_secs(5),
            store: Duration::from_secs(5),
            download: Duration::from_secs(5),
        };
        let platform = Arc::new(FakePlatform::new(script));
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(messenger);
        let base = std::env::temp_dir().join(format!("tgf-service-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        let audit_path = base.with_extension("audit.log");
        let _ = std::fs::remove_file(&audit_path);

        let service = BotService::new(
            Arc::new(LoginManager::new(platform.clone(), store.clone(), timeouts)),
            Arc::new(ContentFetcher::new(
                platform.clone(),
                store.clone(),
                base.join("media"),
                timeouts,
            )),
            store.clone(),
            messenger.clone(),
            AuditLogger::new(&audit_path, true),
            limiter,
            allowed,
            timeouts,
        );
        Harness {
            service,
            messenger,
            platform,
            store,
            audit_path,
        }
    }

    #[test]
    fn text_routing() {
        assert!(matches!(
            route_text("https://t.me/mychannel/7"),
            TextRoute::Fetch(_)
        ));
        assert!(matches!(
            route_text("https://t.me/mychannel/notanumber"),
            TextRoute::BadLink(_)
        ));
        assert_eq!(route_text("+15551234567"), TextRoute::Login);
        assert_eq!(route_text("hello there"), TextRoute::Login);
    }

    #[tokio::test]
    async fn unauthorized_users_are_rejected_and_audited() {
        let h = harness("unauth", Script::default(), vec![1], FetchLimiter::disabled());

        assert!(h.service.authorize(&who(1)).await.unwrap());
        assert!(!h.service.authorize(&who(2)).await.unwrap());
        assert_eq!(h.messenger.texts(), vec![UNAUTHORIZED_TEXT.to_string()]);

        let audit = std::fs::read_to_string(&h.audit_path).unwrap();
        assert!(audit.contains("\"authorized\":false"));
    }

    #[tokio::test]
    async fn full_login_then_fetch() {
        let h = harness("flow", Script::default(), vec![], FetchLimiter::disabled());
        let u = who(5);

        h.service.command(&u, BotCommand::Login).await.unwrap();
        assert!(h.messenger.last_text().contains("phone number"));
        assert_eq!(h.messenger.texts().len(), 1);

        h.service.login_input(&u, "+15551234567").await.unwrap();
        assert!(h.messenger.last_text().contains("+15*******67"));

        h.service.login_input(&u, VALID_CODE).await.unwrap();
        assert!(h.messenger.last_text().starts_with("✅ Logged in"));
        assert_eq!(
            h.store.load(UserId(5)).await.unwrap(),
            Some(Credential::new(CREDENTIAL))
        );

        let link = crate::link::parse("https://t.me/mychannel/7").unwrap();
        h.service.fetch(&u, &link).await.unwrap();
        assert_eq!(h.messenger.last_text(), "hello");
        assert_eq!(h.platform.counters.open_now(), 0);

        // Audit never carries the phone number or the code.
        let audit = std::fs::read_to_string(&h.audit_path).unwrap();
        assert!(audit.contains("code_sent"));
        assert!(audit.contains("logged_in"));
        assert!(!audit.contains("5551234567"));
    }

    #[tokio::test]
    async fn fetch_without_login_asks_to_log_in() {
        let h = harness("nologin", Script::default(), vec![], FetchLimiter::disabled());
        let link = crate::link::parse("https://t.me/mychannel/7").unwrap();

        h.service.fetch(&who(5), &link).await.unwrap();
        assert!(h.messenger.last_text().contains("/login"));
        assert_eq!(h.platform.counters.opened(), 0);
    }

    #[tokio::test]
    async fn media_fetch_sends_media_with_truncated_caption() {
        let long_caption = "c".repeat(100);
        let h = harness(
            "media",
            Script {
                message: Some(photo_message(1, &long_caption)),
                ..Script::default()
            },
            vec![],
            FetchLimiter::disabled(),
        );
        h.store
            .save(UserId(5), &Credential::new(CREDENTIAL))
            .await
            .unwrap();

        let link = crate::link::parse("https://t.me/c/123456789/42").unwrap();
        h.service.fetch(&who(5), &link).await.unwrap();

        let sent = h.messenger.sent();
        assert!(sent.contains(&Sent::Action(ChatId(5), ChatAction::UploadPhoto)));
        let media = sent
            .iter()
            .find_map(|s| match s {
                Sent::Media(_, m) => Some(m.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.caption.chars().count(), 32);
        assert!(h.messenger.texts().is_empty());
        let _ = std::fs::remove_file(&media.path);
    }

    #[tokio::test]
    async fn fetch_is_rate_limited() {
        let h = harness(
            "ratelimit",
            Script {
                message: Some(text_message(1, "post")),
                ..Script::default()
            },
            vec![],
            FetchLimiter::new(true, 1, Duration::from_secs(60)),
        );
        h.store
            .save(UserId(5), &Credential::new(CREDENTIAL))
            .await
            .unwrap();
        let link = crate::link::parse("https://t.me/mychannel/7").unwrap();

        h.service.fetch(&who(5), &link).await.unwrap();
        h.service.fetch(&who(5), &link).await.unwrap();

        assert_eq!(h.platform.counters.opened(), 1);
        assert!(h.messenger.last_text().contains("Rate limited"));
    }

    #[tokio::test]
    async fn status_reports_flow_and_account() {
        let h = harness("status", Script::default(), vec![], FetchLimiter::disabled());
        let u = who(5);

        h.service.command(&u, BotCommand::Status).await.unwrap();
        let text = h.messenger.last_text();
        assert!(text.contains("not connected"));
        assert!(text.contains("no login in progress"));

        h.service.command(&u, BotCommand::Login).await.unwrap();
        h.store
            .save(UserId(5), &Credential::new(CREDENTIAL))
            .await
            .unwrap();
        h.service.command(&u, BotCommand::Status).await.unwrap();
        let text = h.messenger.last_text();
        assert!(text.contains("✅ connected"));
        assert!(text.contains("phone number"));
    }

    #[tokio::test]
    async fn stray_text_and_cancel_are_informative() {
        let h = harness("stray", Script::default(), vec![], FetchLimiter::disabled());
        let u = who(5);

        h.service.login_input(&u, "hello there").await.unwrap();
        assert!(h.messenger.last_text().contains("No login in progress"));

        h.service.command(&u, BotCommand::Cancel).await.unwrap();
        assert_eq!(h.messenger.last_text(), "Nothing to cancel.");

        h.service
            .command(&u, BotCommand::Unknown("logout".into()))
            .await
            .unwrap();
        assert!(h.messenger.last_text().contains("/logout"));
    }

    #[tokio::test]
    async fn long_replies_are_split() {
        let long = "x".repeat(150);
        let h = harness_with(
            "split",
            Script {
                message: Some(text_message(1, &long)),
                ..Script::default()
            },
            vec![],
            FetchLimiter::disabled(),
            RecordingMessenger::with_limits(MessengerLimits {
                max_message_len: 64,
                max_caption_len: 32,
            }),
        );
        h.store
            .save(UserId(5), &Credential::new(CREDENTIAL))
            .await
            .unwrap();
        let link = crate::link::parse("https://t.me/mychannel/7").unwrap();

        h.service.fetch(&who(5), &link).await.unwrap();
        let texts = h.messenger.texts();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts.concat(), long);
    }

    #[test]
    fn interrupted_steps_send_nothing() {
        assert_eq!(render_login_reply(LoginReply::Interrupted), None);
        let text = render_login_reply(LoginReply::PasswordRequired {
            hint: Some("pet".into()),
        })
        .unwrap();
        assert!(text.contains("hint: pet"));
    }
}
