//! Session KV store.
//!
//! Sessions are cross-process state and live in the external KV cache; the
//! in-memory implementation backs tests and degraded operation when the
//! cache is unreachable. Either way, callers must tolerate missing entries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::SessionState;

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Multi-turn session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; `None` when absent or expired.
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>>;

    /// Persist a session with the given TTL, refreshing any existing entry.
    async fn save(&self, session: &SessionState, ttl: Duration) -> Result<()>;

    /// Drop a session. Clearing an unknown session is a no-op.
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// Redis-backed session store.
pub struct RedisSessionStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    /// Connect to the KV cache.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the connection cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Configuration(format!("redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Storage(format!("redis connect: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(session_key(session_id))
            .await
            .map_err(|e| Error::Storage(format!("session load: {e}")))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, session: &SessionState, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(session)?;
        conn.set_ex::<_, _, ()>(session_key(&session.session_id), json, ttl.as_secs())
            .await
            .map_err(|e| Error::Storage(format!("session save: {e}")))?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(session_key(session_id))
            .await
            .map_err(|e| Error::Storage(format!("session delete: {e}")))?;
        Ok(())
    }
}

/// In-memory session store with TTL emulation.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, (SessionState, Instant)>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).and_then(|(session, expires)| {
            if *expires > Instant::now() {
                Some(session.clone())
            } else {
                None
            }
        }))
    }

    async fn save(&self, session: &SessionState, ttl: Duration) -> Result<()> {
        self.sessions.write().await.insert(
            session.session_id.clone(),
            (session.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
