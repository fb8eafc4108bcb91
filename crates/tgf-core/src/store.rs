//! Session Store port.
//!
//! The store is the single source of truth for credentials: nothing here caches a
//! credential across requests, every `load` goes to the store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{Credential, UserId},
    Result,
};

/// Durable upsert/lookup of credentials keyed by user id.
///
/// Implementations map "store unreachable / non-2xx / timeout" to
/// `Error::StoreUnavailable`, and report a missing entry as `Ok(None)`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, user: UserId, credential: &Credential) -> Result<()>;
    async fn load(&self, user: UserId) -> Result<Option<Credential>>;
}

/// Process-local store for development runs and tests.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<UserId, Credential>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save(&self, user: UserId, credential: &Credential) -> Result<()> {
        self.entries.lock().await.insert(user, credential.clone());
        Ok(())
    }

    async fn load(&self, user: UserId) -> Result<Option<Credential>> {
        Ok(self.entries.lock().await.get(&user).cloned())
    }
}
