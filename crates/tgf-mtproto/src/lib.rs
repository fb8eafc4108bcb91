//! Messaging-platform adapter: a user-account MTProto client (grammers).
//!
//! Every `Connection` owns its own client. Dropping the client tears down its
//! network tasks, which is how `close` releases the connection. Credentials are the
//! client's serialized session, base64-encoded so they travel as plain strings.

mod errors;

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use grammers_client::{
    types::{Chat, Downloadable, LoginToken, Media, PasswordToken},
    Client, Config, InitParams, SignInError,
};
use grammers_session::{PackedChat, Session};
use tracing::{debug, info};

use tgf_core::{
    domain::{Credential, MessageId},
    errors::Error,
    link::ChatRef,
    platform::{Connection, MediaInfo, MediaKind, Platform, PlatformMessage, SignIn},
    Result,
};

use crate::errors::{classify, classify_invocation};

/// Application credentials registered with the platform.
#[derive(Clone)]
pub struct MtprotoPlatform {
    api_id: i32,
    api_hash: String,
}

impl MtprotoPlatform {
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
        }
    }

    async fn open(&self, session: Session) -> Result<MtprotoConnection> {
        let client = Client::connect(Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams {
                catch_up: false,
                ..Default::default()
            },
        })
        .await
        .map_err(|e| classify(&e.to_string()))?;

        Ok(MtprotoConnection {
            client,
            login_token: None,
            password_token: None,
            media: HashMap::new(),
        })
    }
}

#[async_trait]
impl Platform for MtprotoPlatform {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.open(Session::new()).await?;
        debug!("unauthenticated connection opened");
        Ok(Box::new(conn))
    }

    async fn resume(&self, credential: &Credential) -> Result<Box<dyn Connection>> {
        let session = decode_session(credential)?;
        let conn = self.open(session).await?;

        let authorized = conn
            .client
            .is_authorized()
            .await
            .map_err(|e| classify_invocation(&e))?;
        if !authorized {
            info!("stored session is no longer authorized");
            return Err(Error::NotAuthenticated);
        }
        Ok(Box::new(conn))
    }
}

struct MtprotoConnection {
    client: Client,
    login_token: Option<LoginToken>,
    password_token: Option<PasswordToken>,
    /// Media of messages returned by `get_message`, for a later download.
    media: HashMap<i32, Media>,
}

impl MtprotoConnection {
    async fn resolve(&self, chat: &ChatRef) -> Result<Option<PackedChat>> {
        match chat {
            ChatRef::Handle(handle) => {
                let resolved = self
                    .client
                    .resolve_username(handle)
                    .await
                    .map_err(|e| classify_invocation(&e))?;
                Ok(resolved.map(|c| c.pack()))
            }
            ChatRef::Internal(_) => {
                let Some(bare) = chat.bare_channel_id() else {
                    return Ok(None);
                };
                // Private chats can only be addressed with the access hash the
                // account already holds, so look the chat up among its dialogs.
                let mut dialogs = self.client.iter_dialogs();
                while let Some(dialog) = dialogs
                    .next()
                    .await
                    .map_err(|e| classify_invocation(&e))?
                {
                    let chat: &Chat = dialog.chat();
                    if chat.id() == bare {
                        return Ok(Some(chat.pack()));
                    }
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Connection for MtprotoConnection {
    async fn request_code(&mut self, phone: &str) -> Result<()> {
        let token = self
            .client
            .request_login_code(phone)
            .await
            .map_err(|e| classify(&e.to_string()))?;
        self.login_token = Some(token);
        Ok(())
    }

    async fn sign_in(&mut self, code: &str) -> Result<SignIn> {
        let Some(token) = self.login_token.as_ref() else {
            return Err(Error::External("sign-in without a code request".to_string()));
        };

        match self.client.sign_in(token, code).await {
            Ok(_) => Ok(SignIn::Authorized),
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(str::to_string);
                self.password_token = Some(password_token);
                Ok(SignIn::PasswordRequired { hint })
            }
            Err(SignInError::InvalidCode) => Err(Error::ChallengeFailed("invalid code".to_string())),
            Err(SignInError::SignUpRequired { .. }) => Err(Error::InputRejected(
                "no Telegram account exists for this phone number".to_string(),
            )),
            Err(SignInError::Other(e)) => Err(classify_invocation(&e)),
            Err(e) => Err(classify(&e.to_string())),
        }
    }

    async fn check_password(&mut self, password: &str) -> Result<()> {
        // The token is single-use: a failed check ends the login.
        let Some(token) = self.password_token.take() else {
            return Err(Error::External("password check without a challenge".to_string()));
        };

        match self.client.check_password(token, password).await {
            Ok(_) => Ok(()),
            Err(SignInError::InvalidPassword) => {
                Err(Error::ChallengeFailed("wrong password".to_string()))
            }
            Err(SignInError::Other(e)) => Err(classify_invocation(&e)),
            Err(e) => Err(classify(&e.to_string())),
        }
    }

    async fn export_credential(&self) -> Result<Credential> {
        Ok(encode_session(&self.client.session().save()))
    }

    async fn get_message(
        &mut self,
        chat: &ChatRef,
        id: MessageId,
    ) -> Result<Option<PlatformMessage>> {
        let Some(packed) = self.resolve(chat).await? else {
            return Ok(None);
        };

        let mut found = match self.client.get_messages_by_id(packed, &[id.0]).await {
            Ok(found) => found,
            Err(e) => match classify_invocation(&e) {
                Error::NotFoundOrForbidden => return Ok(None),
                other => return Err(other),
            },
        };
        let Some(Some(message)) = found.pop() else {
            return Ok(None);
        };

        let text = message.text().to_string();
        let Some((info, media)) = message.media().and_then(|m| describe(&m).map(|i| (i, m))) else {
            return Ok(Some(PlatformMessage {
                id,
                text,
                caption: String::new(),
                media: None,
            }));
        };

        self.media.insert(id.0, media);
        // On the platform, a media message's text is its caption.
        Ok(Some(PlatformMessage {
            id,
            text: String::new(),
            caption: text,
            media: Some(info),
        }))
    }

    async fn download_media(&mut self, message: &PlatformMessage, dest: &Path) -> Result<()> {
        let Some(media) = self.media.remove(&message.id.0) else {
            return Err(Error::External(format!(
                "no media cached for message {}",
                message.id
            )));
        };

        self.client
            .download_media(&Downloadable::Media(media), dest)
            .await
            .map_err(|e| Error::NetworkTransient(format!("media download failed: {e}")))
    }

    async fn close(self: Box<Self>) {
        debug!("connection closed");
        drop(self);
    }
}

/// Media kinds that can be delivered as a file. Polls, locations, contacts and
/// link previews count as no media.
fn describe(media: &Media) -> Option<MediaInfo> {
    match media {
        Media::Photo(_) => Some(MediaInfo {
            kind: MediaKind::Photo,
            file_name: None,
        }),
        Media::Sticker(_) => Some(MediaInfo {
            kind: MediaKind::Sticker,
            file_name: None,
        }),
        Media::Document(doc) => {
            let name = doc.name();
            Some(MediaInfo {
                kind: MediaKind::from_mime(doc.mime_type()),
                file_name: (!name.is_empty()).then(|| name.to_string()),
            })
        }
        _ => None,
    }
}

fn encode_session(bytes: &[u8]) -> Credential {
    Credential::new(STANDARD.encode(bytes))
}

/// An undecodable credential can never authenticate again.
fn decode_session(credential: &Credential) -> Result<Session> {
    let bytes = STANDARD
        .decode(credential.expose().trim())
        .map_err(|_| Error::NotAuthenticated)?;
    Session::load(&bytes).map_err(|_| Error::NotAuthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_credential_is_not_authenticated() {
        assert!(matches!(
            decode_session(&Credential::new("not base64 at all!")),
            Err(Error::NotAuthenticated)
        ));
        assert!(matches!(
            decode_session(&Credential::new(STANDARD.encode(b"\x00\x01junk"))),
            Err(Error::NotAuthenticated)
        ));
    }

    #[test]
    fn fresh_session_survives_export() {
        let credential = encode_session(&Session::new().save());
        assert!(decode_session(&credential).is_ok());
    }
}
