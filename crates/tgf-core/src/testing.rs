//! In-memory fakes of the platform port for unit tests.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{Credential, MessageId},
    errors::Error,
    link::ChatRef,
    platform::{Connection, MediaInfo, MediaKind, Platform, PlatformMessage, SignIn},
    Result,
};

pub(crate) const VALID_CODE: &str = "12345";
pub(crate) const CREDENTIAL: &str = "serialized-session";

#[derive(Clone, Debug)]
pub(crate) struct Script {
    pub connect_fails: bool,
    pub reject_phone: bool,
    pub second_factor: Option<&'static str>,
    pub sign_in_transient: bool,
    pub hang_sign_in: bool,
    pub credential_valid: bool,
    pub message: Option<PlatformMessage>,
    pub download_fails: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_fails: false,
            reject_phone: false,
            second_factor: None,
            sign_in_transient: false,
            hang_sign_in: false,
            credential_valid: true,
            message: Some(text_message(7, "hello")),
            download_fails: false,
        }
    }
}

pub(crate) fn text_message(id: i32, text: &str) -> PlatformMessage {
    PlatformMessage {
        id: MessageId(id),
        text: text.to_string(),
        caption: String::new(),
        media: None,
    }
}

pub(crate) fn photo_message(id: i32, caption: &str) -> PlatformMessage {
    PlatformMessage {
        id: MessageId(id),
        text: String::new(),
        caption: caption.to_string(),
        media: Some(MediaInfo {
            kind: MediaKind::Photo,
            file_name: None,
        }),
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    sign_ins: AtomicUsize,
}

impl Counters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.opened() - self.closed()
    }

    pub fn sign_ins(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    script: Mutex<Script>,
    pub counters: Arc<Counters>,
}

impl FakePlatform {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    fn open(&self) -> Result<Box<dyn Connection>> {
        let script = self.script.lock().unwrap().clone();
        if script.connect_fails {
            return Err(Error::NetworkTransient("connection refused".to_string()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            script,
            counters: self.counters.clone(),
        }))
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.open()
    }

    async fn resume(&self, credential: &Credential) -> Result<Box<dyn Connection>> {
        assert_eq!(credential.expose(), CREDENTIAL);
        if !self.script.lock().unwrap().credential_valid {
            return Err(Error::NotAuthenticated);
        }
        self.open()
    }
}

struct FakeConnection {
    script: Script,
    counters: Arc<Counters>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn request_code(&mut self, _phone: &str) -> Result<()> {
        if self.script.reject_phone {
            return Err(Error::InputRejected("phone number invalid".to_string()));
        }
        Ok(())
    }

    async fn sign_in(&mut self, code: &str) -> Result<SignIn> {
        self.counters.sign_ins.fetch_add(1, Ordering::SeqCst);
        if self.script.hang_sign_in {
            std::future::pending::<()>().await;
        }
        if self.script.sign_in_transient {
            return Err(Error::NetworkTransient("connection reset".to_string()));
        }
        if code != VALID_CODE {
            return Err(Error::ChallengeFailed("invalid code".to_string()));
        }
        Ok(match self.script.second_factor {
            Some(_) => SignIn::PasswordRequired {
                hint: Some("pet name".to_string()),
            },
            None => SignIn::Authorized,
        })
    }

    async fn check_password(&mut self, password: &str) -> Result<()> {
        match self.script.second_factor {
            Some(expected) if expected == password => Ok(()),
            _ => Err(Error::ChallengeFailed("invalid password".to_string())),
        }
    }

    async fn export_credential(&self) -> Result<Credential> {
        Ok(Credential::new(CREDENTIAL))
    }

    async fn get_message(
        &mut self,
        chat: &ChatRef,
        id: MessageId,
    ) -> Result<Option<PlatformMessage>> {
        if *chat == ChatRef::Handle("missing".to_string()) {
            return Ok(None);
        }
        Ok(self.script.message.clone().map(|mut m| {
            m.id = id;
            m
        }))
    }

    async fn download_media(&mut self, _message: &PlatformMessage, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, b"partial").await?;
        if self.script.download_fails {
            return Err(Error::NetworkTransient("download interrupted".to_string()));
        }
        tokio::fs::write(dest, b"media-bytes").await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Store that is always unreachable.
pub(crate) struct UnreachableStore;

#[async_trait]
impl crate::store::SessionStore for UnreachableStore {
    async fn save(&self, _user: crate::domain::UserId, _credential: &Credential) -> Result<()> {
        Err(Error::StoreUnavailable("503 Service Unavailable".to_string()))
    }

    async fn load(&self, _user: crate::domain::UserId) -> Result<Option<Credential>> {
        Err(Error::StoreUnavailable("503 Service Unavailable".to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Sent {
    Text(crate::domain::ChatId, String),
    Media(crate::domain::ChatId, crate::delivery::MediaPayload),
    Action(crate::domain::ChatId, crate::messaging::types::ChatAction),
}

/// Messenger that records everything it is asked to send.
pub(crate) struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    limits: crate::messaging::types::MessengerLimits,
}

impl Default for RecordingMessenger {
    /// Real message limit, short caption limit.
    fn default() -> Self {
        Self::with_limits(crate::messaging::types::MessengerLimits {
            max_message_len: 4096,
            max_caption_len: 32,
        })
    }
}

impl RecordingMessenger {
    pub fn with_limits(limits: crate::messaging::types::MessengerLimits) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            limits,
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(_, t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }
}

#[async_trait]
impl crate::messaging::port::MessagingPort for RecordingMessenger {
    fn limits(&self) -> crate::messaging::types::MessengerLimits {
        self.limits
    }

    async fn send_text(&self, chat_id: crate::domain::ChatId, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: crate::domain::ChatId,
        media: &crate::delivery::MediaPayload,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Media(chat_id, media.clone()));
        Ok(())
    }

    async fn send_chat_action(
        &self,
        chat_id: crate::domain::ChatId,
        action: crate::messaging::types::ChatAction,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Action(chat_id, action));
        Ok(())
    }
}
