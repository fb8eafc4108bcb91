//! HTTP Session Store client.
//!
//! Two endpoints on the store service:
//! - `POST {base}/store_session` with `{"user_id": .., "session": ".."}` (upsert)
//! - `GET {base}/get_session?user_id=..` returning `{"session": ".."}`; 404 means none.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tgf_core::{
    domain::{Credential, UserId},
    errors::Error,
    store::SessionStore,
    Result,
};

#[derive(Serialize)]
struct StoreRequest<'a> {
    user_id: i64,
    session: &'a str,
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(default)]
    session: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HttpSessionStore {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSessionStore {
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("session store client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn unavailable(op: &str, e: reqwest::Error) -> Error {
    let reason = if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        e.to_string()
    };
    Error::StoreUnavailable(format!("{op}: {reason}"))
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn save(&self, user: UserId, credential: &Credential) -> Result<()> {
        let resp = self
            .http
            .post(self.url("store_session"))
            .json(&StoreRequest {
                user_id: user.0,
                session: credential.expose(),
            })
            .send()
            .await
            .map_err(|e| unavailable("store_session", e))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(%user, %status, "session store rejected save");
            return Err(Error::StoreUnavailable(format!(
                "store_session returned {status}"
            )));
        }
        debug!(%user, "credential saved");
        Ok(())
    }

    async fn load(&self, user: UserId) -> Result<Option<Credential>> {
        let resp = self
            .http
            .get(self.url("get_session"))
            .query(&[("user_id", user.0)])
            .send()
            .await
            .map_err(|e| unavailable("get_session", e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            warn!(%user, %status, "session store load failed");
            return Err(Error::StoreUnavailable(format!(
                "get_session returned {status}"
            )));
        }

        let body: SessionResponse = resp
            .json()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("get_session: malformed response: {e}")))?;

        Ok(body
            .session
            .filter(|s| !s.trim().is_empty())
            .map(Credential::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn store(server: &mockito::Server) -> HttpSessionStore {
        HttpSessionStore::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn save_posts_user_and_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/store_session")
            .match_body(Matcher::Json(serde_json::json!({
                "user_id": 42,
                "session": "opaque"
            })))
            .with_status(200)
            .with_body("{\"ok\":true}")
            .create_async()
            .await;

        store(&server)
            .save(UserId(42), &Credential::new("opaque"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn save_non_2xx_is_store_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/store_session")
            .with_status(500)
            .create_async()
            .await;

        let err = store(&server)
            .save(UserId(1), &Credential::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn load_returns_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/get_session")
            .match_query(Matcher::UrlEncoded("user_id".into(), "42".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({ "session": "opaque" }).to_string())
            .create_async()
            .await;

        let loaded = store(&server).load(UserId(42)).await.unwrap();
        assert_eq!(loaded, Some(Credential::new("opaque")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn load_not_found_variants_are_none() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/get_session")
            .match_query(Matcher::UrlEncoded("user_id".into(), "1".into()))
            .with_status(404)
            .create_async()
            .await;
        let _null = server
            .mock("GET", "/get_session")
            .match_query(Matcher::UrlEncoded("user_id".into(), "2".into()))
            .with_status(200)
            .with_body("{\"session\":null}")
            .create_async()
            .await;
        let _absent = server
            .mock("GET", "/get_session")
            .match_query(Matcher::UrlEncoded("user_id".into(), "3".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let s = store(&server);
        assert_eq!(s.load(UserId(1)).await.unwrap(), None);
        assert_eq!(s.load(UserId(2)).await.unwrap(), None);
        assert_eq!(s.load(UserId(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_failure_is_distinct_from_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get_session")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = store(&server).load(UserId(9)).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        // Nothing listens on port 9 locally.
        let s = HttpSessionStore::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let err = s.load(UserId(1)).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get_session")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = store(&server).load(UserId(9)).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
