//! In-process session store.
//!
//! Both maps — the primary record map and the refresh-token index — live
//! behind a single lock, so rotation swaps the record and the index in one
//! critical section. No reader can observe the old token still indexed
//! alongside the new record, or the reverse.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{new_refresh_token, DeviceInfo, SessionRecord, SessionStore};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    by_refresh_token: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        user_id: &str,
        ttl: Duration,
        device: Option<DeviceInfo>,
    ) -> anyhow::Result<SessionRecord> {
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            refresh_token: new_refresh_token(),
            created_at: now,
            last_accessed_at: now,
            expires_at: now + ttl,
            device,
        };

        let mut inner = self.write();
        inner
            .by_refresh_token
            .insert(record.refresh_token.clone(), record.id.clone());
        inner.sessions.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let inner = self.read();
        Ok(inner
            .by_refresh_token
            .get(refresh_token)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn rotate(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let mut guard = self.write();
        let Inner {
            sessions,
            by_refresh_token,
        } = &mut *guard;

        let Some(record) = sessions.get_mut(session_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        by_refresh_token.remove(&record.refresh_token);
        record.refresh_token = new_refresh_token();
        record.expires_at = now + ttl;
        record.last_accessed_at = now;
        by_refresh_token.insert(record.refresh_token.clone(), record.id.clone());
        Ok(Some(record.clone()))
    }

    async fn touch(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let mut guard = self.write();
        let Inner {
            sessions,
            by_refresh_token,
        } = &mut *guard;

        let Some(record) = sessions.get_mut(session_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        if record.is_expired(now) {
            // Lazy revoke: an expired session is gone from every caller's
            // point of view the moment it is next observed.
            by_refresh_token.remove(&record.refresh_token);
            sessions.remove(session_id);
            return Ok(None);
        }

        record.last_accessed_at = now;
        Ok(Some(record.clone()))
    }

    async fn revoke(&self, session_id: &str) -> anyhow::Result<()> {
        let mut inner = self.write();
        if let Some(record) = inner.sessions.remove(session_id) {
            inner.by_refresh_token.remove(&record.refresh_token);
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<SessionRecord>> {
        let now = Utc::now();
        let inner = self.read();
        let mut sessions: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_expired(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    async fn find_owned(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let now = Utc::now();
        let inner = self.read();
        Ok(inner
            .sessions
            .get(session_id)
            .filter(|s| s.user_id == user_id && !s.is_expired(now))
            .cloned())
    }
}
