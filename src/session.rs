use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{csrf_token::random_token, token::TokenSet};

/// Opaque identifier of a login session, carried by the session cookie.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Anyone knowing the id owns the session. Only show a prefix.
        let prefix = self.0.get(..6).unwrap_or_default();
        write!(f, "SessionId({prefix}...)")
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where the token set of each login session lives.
///
/// Implement this to keep sessions in a shared store (Redis, a database, ...). Every method
/// replaces or reads the whole [`TokenSet`] at once.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn load(&self, id: &SessionId) -> Option<TokenSet>;

    async fn store(&self, id: &SessionId, tokens: TokenSet);

    async fn remove(&self, id: &SessionId);
}

/// Process local [`SessionStore`]. Sessions are lost on restart and not shared between replicas.
///
/// Sessions that can no longer authenticate (see [`TokenSet::is_alive`]) are dropped whenever
/// they are looked up and on every write.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, TokenSet>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Option<TokenSet> {
        let tokens = self.sessions.read().await.get(id).cloned()?;
        if tokens.is_alive() {
            return Some(tokens);
        }
        let mut sessions = self.sessions.write().await;
        // Only drop what is still dead. A concurrent store may have replaced it.
        if sessions.get(id).is_some_and(|tokens| !tokens.is_alive()) {
            sessions.remove(id);
            tracing::debug!(session = ?id, "Dropped dead session");
        }
        None
    }

    async fn store(&self, id: &SessionId, tokens: TokenSet) {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, existing| existing.is_alive());
        if sessions.len() < before {
            tracing::debug!(dropped = before - sessions.len(), "Dropped dead sessions");
        }
        if tokens.is_alive() {
            sessions.insert(id.clone(), tokens);
        } else {
            sessions.remove(id);
        }
    }

    async fn remove(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);
    }
}

/// One async lock per session that is currently refreshing.
#[derive(Debug, Default)]
pub(crate) struct RefreshLocks {
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshLocks {
    pub(crate) fn get(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop locks nobody waits on anymore.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id.clone()).or_default().clone()
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The session named by the session cookie, whether or not it still exists.
pub(crate) fn session_id_from(jar: &CookieJar, cookie_name: &str) -> Option<SessionId> {
    jar.get(cookie_name)
        .map(|cookie| cookie.value())
        .filter(|value| !value.is_empty())
        .map(|value| SessionId::from(value.to_owned()))
}

pub(crate) fn build_cookie(name: &str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_owned(), value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

pub(crate) fn removal_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_owned(), "")).path("/").build()
}
