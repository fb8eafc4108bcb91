//! Per-user login state machine.
//!
//! Drives phone → one-time code → optional second factor → persisted credential,
//! one independent instance per user id. Access to a user's session is serialized by
//! a per-user mutex; cancellation goes through a per-user token so it can interrupt
//! a step that is waiting on the network.
//!
//! The session value owns its platform connection. Every transition consumes the
//! session and either hands back the next one or closes the connection, so a
//! terminal transition cannot leave a connection behind.

use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Timeouts,
    domain::{mask_phone, UserId},
    errors::Error,
    platform::{Connection, Platform, SignIn},
    store::SessionStore,
    Result,
};

/// Observable state of an in-progress login. IDLE is the absence of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginState {
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginStatus {
    Idle,
    InProgress(LoginState),
    /// A step is currently waiting on the network.
    Busy,
}

/// What the user should be told after a login step.
#[derive(Debug)]
pub enum LoginReply {
    AskPhone,
    /// `/login` while a flow was in progress: the old attempt was torn down.
    Restarted,
    InvalidPhone,
    CodeSent { masked_phone: String },
    InvalidCode,
    PasswordRequired { hint: Option<String> },
    LoggedIn,
    /// Authentication succeeded but the credential could not be persisted.
    LoggedInNotSaved(Error),
    /// Terminal failure; the session was discarded and its connection closed.
    Failed(Error),
    Cancelled,
    NothingToCancel,
    /// Input arrived while no login is in progress.
    NotInProgress,
    /// The step was interrupted by a concurrent cancel; the cancel reports to the user.
    Interrupted,
}

enum LoginSession {
    AwaitingPhone,
    AwaitingCode {
        phone: String,
        connection: Box<dyn Connection>,
    },
    AwaitingPassword {
        phone: String,
        hint: Option<String>,
        connection: Box<dyn Connection>,
    },
}

impl LoginSession {
    fn state(&self) -> LoginState {
        match self {
            LoginSession::AwaitingPhone => LoginState::AwaitingPhone,
            LoginSession::AwaitingCode { .. } => LoginState::AwaitingCode,
            LoginSession::AwaitingPassword { .. } => LoginState::AwaitingPassword,
        }
    }

    async fn close(self) {
        match self {
            LoginSession::AwaitingPhone => {}
            LoginSession::AwaitingCode { connection, .. }
            | LoginSession::AwaitingPassword { connection, .. } => connection.close().await,
        }
    }
}

/// Why a step stopped before reaching its next state.
enum StepFailure {
    Cancelled,
    Failed(Error),
}

impl From<Error> for StepFailure {
    fn from(e: Error) -> Self {
        StepFailure::Failed(e)
    }
}

impl StepFailure {
    fn into_reply(self) -> LoginReply {
        match self {
            StepFailure::Cancelled => LoginReply::Interrupted,
            StepFailure::Failed(e) => LoginReply::Failed(e),
        }
    }
}

type Transition = (Option<LoginSession>, LoginReply);

struct Slot {
    session: Mutex<Option<LoginSession>>,
    cancel: Mutex<CancellationToken>,
}

impl Slot {
    fn new() -> Self {
        Self {
            session: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    async fn token(&self) -> CancellationToken {
        self.cancel.lock().await.clone()
    }

    /// Cancel whatever step holds the current token and arm a fresh one.
    async fn interrupt(&self) {
        let mut guard = self.cancel.lock().await;
        let old = std::mem::replace(&mut *guard, CancellationToken::new());
        old.cancel();
    }
}

/// Table of login sessions keyed by user id.
pub struct LoginManager {
    platform: Arc<dyn Platform>,
    store: Arc<dyn SessionStore>,
    timeouts: Timeouts,
    slots: Mutex<HashMap<UserId, Arc<Slot>>>,
}

impl LoginManager {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn SessionStore>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            platform,
            store,
            timeouts,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Only `start` creates a slot.
    async fn slot(&self, user: UserId) -> Arc<Slot> {
        let mut map = self.slots.lock().await;
        map.entry(user)
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    async fn existing(&self, user: UserId) -> Option<Arc<Slot>> {
        self.slots.lock().await.get(&user).cloned()
    }

    /// Drop the user's slot once it holds no session and nobody else uses it.
    /// The handle is released under the table lock, so of two concurrent callers
    /// the later one always sees itself as the last user.
    async fn release(&self, user: UserId, slot: Arc<Slot>) {
        let mut map = self.slots.lock().await;
        let owned_by_table = map.get(&user).is_some_and(|s| Arc::ptr_eq(s, &slot));
        let idle = owned_by_table
            && Arc::strong_count(&slot) == 2
            && slot.session.try_lock().is_ok_and(|g| g.is_none());
        drop(slot);
        if idle {
            map.remove(&user);
            debug!(%user, "login slot released");
        }
    }

    pub async fn status(&self, user: UserId) -> LoginStatus {
        let map = self.slots.lock().await;
        let Some(slot) = map.get(&user) else {
            return LoginStatus::Idle;
        };
        let Ok(guard) = slot.session.try_lock() else {
            return LoginStatus::Busy;
        };
        match guard.as_ref() {
            Some(s) => LoginStatus::InProgress(s.state()),
            None => LoginStatus::Idle,
        }
    }

    /// Number of users with a login in progress (steps in flight count as in progress).
    pub async fn active_sessions(&self) -> usize {
        let map = self.slots.lock().await;
        map.values()
            .filter(|slot| !matches!(slot.session.try_lock(), Ok(guard) if guard.is_none()))
            .count()
    }

    /// Number of users with a slot in the table.
    pub async fn tracked_users(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Login command: enter AWAITING_PHONE, tearing down any attempt in progress.
    pub async fn start(&self, user: UserId) -> LoginReply {
        let slot = self.slot(user).await;
        let mut guard = slot.session.lock().await;

        let previous = guard.take();
        let restarted = matches!(
            previous,
            Some(LoginSession::AwaitingCode { .. } | LoginSession::AwaitingPassword { .. })
        );
        if let Some(previous) = previous {
            previous.close().await;
        }
        *guard = Some(LoginSession::AwaitingPhone);

        info!(%user, restarted, "login started");
        if restarted {
            LoginReply::Restarted
        } else {
            LoginReply::AskPhone
        }
    }

    /// Explicit cancel. Interrupts an in-flight step, then discards the session.
    pub async fn cancel(&self, user: UserId) -> LoginReply {
        let Some(slot) = self.existing(user).await else {
            return LoginReply::NothingToCancel;
        };
        let was_busy = slot.session.try_lock().is_err();
        slot.interrupt().await;

        let mut guard = slot.session.lock().await;
        let reply = match guard.take() {
            Some(session) => {
                session.close().await;
                info!(%user, "login cancelled");
                LoginReply::Cancelled
            }
            None if was_busy => {
                info!(%user, "in-flight login step cancelled");
                LoginReply::Cancelled
            }
            None => LoginReply::NothingToCancel,
        };
        drop(guard);
        self.release(user, slot).await;
        reply
    }

    /// Phone, code or password text for the user's current state.
    pub async fn input(&self, user: UserId, text: &str) -> LoginReply {
        let Some(slot) = self.existing(user).await else {
            return LoginReply::NotInProgress;
        };
        // Taken before waiting on the session, so a cancel issued meanwhile still
        // interrupts this step.
        let token = slot.token().await;
        let mut guard = slot.session.lock().await;

        let reply = match guard.take() {
            Some(session) => {
                let (next, reply) = self.transition(user, session, text, &token).await;
                match &next {
                    Some(s) => debug!(%user, state = ?s.state(), "login step done"),
                    None => debug!(%user, "login session discarded"),
                }
                *guard = next;
                reply
            }
            None => LoginReply::NotInProgress,
        };
        drop(guard);
        self.release(user, slot).await;
        reply
    }

    async fn transition(
        &self,
        user: UserId,
        session: LoginSession,
        text: &str,
        token: &CancellationToken,
    ) -> Transition {
        match session {
            LoginSession::AwaitingPhone => match normalize_phone(text) {
                Some(phone) => self.request_code(user, phone, token).await,
                None => (Some(LoginSession::AwaitingPhone), LoginReply::InvalidPhone),
            },

            LoginSession::AwaitingCode {
                phone,
                mut connection,
            } => {
                // A fresh phone number restarts the flow on a new connection.
                if let Some(new_phone) = restart_phone(text) {
                    connection.close().await;
                    info!(%user, phone = %mask_phone(&new_phone), "login restarted with new phone");
                    return self.request_code(user, new_phone, token).await;
                }
                let Some(code) = normalize_code(text) else {
                    return (
                        Some(LoginSession::AwaitingCode { phone, connection }),
                        LoginReply::InvalidCode,
                    );
                };

                let signed_in = self.call(token, connection.sign_in(&code)).await;
                match signed_in {
                    Ok(SignIn::Authorized) => self.complete(user, connection, token).await,
                    Ok(SignIn::PasswordRequired { hint }) => {
                        info!(%user, "second factor required");
                        (
                            Some(LoginSession::AwaitingPassword {
                                phone,
                                hint: hint.clone(),
                                connection,
                            }),
                            LoginReply::PasswordRequired { hint },
                        )
                    }
                    Err(failure) => {
                        connection.close().await;
                        log_failure(user, "sign-in", &failure);
                        (None, failure.into_reply())
                    }
                }
            }

            LoginSession::AwaitingPassword {
                phone,
                hint,
                mut connection,
            } => {
                if let Some(new_phone) = restart_phone(text) {
                    connection.close().await;
                    info!(%user, phone = %mask_phone(&new_phone), "login restarted with new phone");
                    return self.request_code(user, new_phone, token).await;
                }
                let password = text.trim();
                if password.is_empty() {
                    return (
                        Some(LoginSession::AwaitingPassword {
                            phone,
                            hint: hint.clone(),
                            connection,
                        }),
                        LoginReply::PasswordRequired { hint },
                    );
                }
                debug!(%user, phone = %mask_phone(&phone), "checking second factor");

                let checked = self.call(token, connection.check_password(password)).await;
                match checked {
                    Ok(()) => self.complete(user, connection, token).await,
                    Err(failure) => {
                        connection.close().await;
                        log_failure(user, "second factor", &failure);
                        (None, failure.into_reply())
                    }
                }
            }
        }
    }

    /// Open a connection and ask for a one-time code. On any failure the
    /// connection is closed and the session ends.
    async fn request_code(
        &self,
        user: UserId,
        phone: String,
        token: &CancellationToken,
    ) -> Transition {
        let mut connection = match self.call(token, self.platform.connect()).await {
            Ok(c) => c,
            Err(failure) => {
                log_failure(user, "connect", &failure);
                return (None, failure.into_reply());
            }
        };

        let requested = self.call(token, connection.request_code(&phone)).await;
        match requested {
            Ok(()) => {
                let masked_phone = mask_phone(&phone);
                info!(%user, phone = %masked_phone, "login code requested");
                (
                    Some(LoginSession::AwaitingCode { phone, connection }),
                    LoginReply::CodeSent { masked_phone },
                )
            }
            Err(failure) => {
                connection.close().await;
                log_failure(user, "code request", &failure);
                (None, failure.into_reply())
            }
        }
    }

    /// AUTHENTICATED: serialize, close, persist. Never a resting state.
    async fn complete(
        &self,
        user: UserId,
        connection: Box<dyn Connection>,
        token: &CancellationToken,
    ) -> Transition {
        let exported = self.call(token, connection.export_credential()).await;
        connection.close().await;

        let credential = match exported {
            Ok(c) => c,
            Err(failure) => {
                log_failure(user, "credential export", &failure);
                return (None, failure.into_reply());
            }
        };

        let saved = match tokio::time::timeout(
            self.timeouts.store,
            self.store.save(user, &credential),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(Error::StoreUnavailable("store save timed out".to_string())),
        };

        match saved {
            Ok(()) => {
                info!(%user, "login succeeded, credential persisted");
                (None, LoginReply::LoggedIn)
            }
            Err(e) => {
                warn!(%user, error = %e, "login succeeded but credential was not persisted");
                (None, LoginReply::LoggedInNotSaved(e))
            }
        }
    }

    /// Run one platform call under the platform timeout, aborting it on cancel.
    async fn call<T>(
        &self,
        token: &CancellationToken,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, StepFailure> {
        tokio::select! {
            _ = token.cancelled() => Err(StepFailure::Cancelled),
            res = tokio::time::timeout(self.timeouts.platform, fut) => match res {
                Ok(r) => r.map_err(StepFailure::from),
                Err(_) => Err(StepFailure::Failed(Error::NetworkTransient(
                    "platform call timed out".to_string(),
                ))),
            },
        }
    }
}

fn log_failure(user: UserId, step: &str, failure: &StepFailure) {
    match failure {
        StepFailure::Cancelled => info!(%user, step, "login step interrupted by cancel"),
        StepFailure::Failed(e) => warn!(%user, step, error = %e, "login step failed"),
    }
}

/// Normalize a phone number: strips spaces, dashes, dots and parentheses; a leading
/// `+` is optional; 7 to 15 digits. Returns the `+<digits>` form.
pub fn normalize_phone(text: &str) -> Option<String> {
    let compact: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if !(7..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{digits}"))
}

/// Normalize a one-time code: separators are stripped, 4 to 8 digits remain.
pub fn normalize_code(text: &str) -> Option<String> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.'))
        .collect();
    if !(4..=8).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits)
}

/// A `+`-prefixed phone number sent mid-flow.
fn restart_phone(text: &str) -> Option<String> {
    if !text.trim_start().starts_with('+') {
        return None;
    }
    normalize_phone(text)
}
