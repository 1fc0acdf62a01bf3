//! Session persistence backends.
//!
//! Stores are keyed by the SHA-256 hash of the session token, never by the
//! raw token. Expired records are invisible to `find` whether or not the
//! cleanup sweep has removed them yet.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::SessionData;

/// A persisted session as returned by a store.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub data: SessionData,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load an unexpired session by token hash.
    async fn find(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Insert or replace the session stored under `token_hash`.
    async fn commit(
        &self,
        token_hash: &[u8],
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete(&self, token_hash: &[u8]) -> Result<()>;

    /// Remove every expired session, returning how many were removed.
    async fn delete_expired(&self) -> Result<u64>;
}

/// Process-local store for tests and single-instance development.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .get(token_hash)
            .filter(|record| record.expires_at > now)
            .cloned())
    }

    async fn commit(
        &self,
        token_hash: &[u8],
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.sessions.write().insert(
            token_hash.to_vec(),
            SessionRecord {
                data: data.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<()> {
        self.sessions.write().remove(token_hash);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
    }
}
