//! Redis-backed session store for multi-instance deployments.
//!
//! Layout:
//!   `session:{id}`        — hash of session fields
//!   `refresh:{token}`     — refresh-token index, value is the session id
//!   `user_sessions:{uid}` — set of session ids owned by a user
//!
//! Rotation runs as a single Lua script so the old index entry, the updated
//! record, and the new index entry change atomically — a concurrent
//! `find_by_refresh_token` sees either the old state or the new one, never a
//! mix. Keys outlive `expires_at` by a grace window so a recently expired
//! refresh token still resolves and the caller can report "expired" rather
//! than "unknown".

use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{new_refresh_token, DeviceInfo, SessionRecord, SessionStore};

const EXPIRY_GRACE_SECS: i64 = 7 * 86_400;

pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn session_key(id: &str) -> String {
    format!("session:{id}")
}

fn refresh_key(token: &str) -> String {
    format!("refresh:{token}")
}

fn user_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

fn grace_ttl(ttl: Duration) -> i64 {
    ttl.num_seconds().max(0) + EXPIRY_GRACE_SECS
}

fn to_pairs(record: &SessionRecord) -> anyhow::Result<Vec<(&'static str, String)>> {
    let device = match &record.device {
        Some(device) => serde_json::to_string(device)?,
        None => String::new(),
    };
    Ok(vec![
        ("id", record.id.clone()),
        ("user_id", record.user_id.clone()),
        ("refresh_token", record.refresh_token.clone()),
        ("created_at", record.created_at.to_rfc3339()),
        ("last_accessed_at", record.last_accessed_at.to_rfc3339()),
        ("expires_at", record.expires_at.to_rfc3339()),
        ("device", device),
    ])
}

fn parse_time(map: &HashMap<String, String>, field: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = map
        .get(field)
        .with_context(|| format!("session hash is missing `{field}`"))?;
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("session hash has malformed `{field}`"))?
        .with_timezone(&Utc))
}

fn from_map(map: HashMap<String, String>) -> anyhow::Result<SessionRecord> {
    let field = |name: &str| -> anyhow::Result<String> {
        map.get(name)
            .cloned()
            .with_context(|| format!("session hash is missing `{name}`"))
    };
    let device: Option<DeviceInfo> = match map.get("device").map(String::as_str) {
        Some("") | None => None,
        Some(json) => Some(serde_json::from_str(json).context("malformed device metadata")?),
    };
    Ok(SessionRecord {
        id: field("id")?,
        user_id: field("user_id")?,
        refresh_token: field("refresh_token")?,
        created_at: parse_time(&map, "created_at")?,
        last_accessed_at: parse_time(&map, "last_accessed_at")?,
        expires_at: parse_time(&map, "expires_at")?,
        device,
    })
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
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

        let keep = grace_ttl(ttl);
        let pairs = to_pairs(&record)?;
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .hset_multiple(session_key(&record.id), &pairs)
            .ignore()
            .expire(session_key(&record.id), keep)
            .ignore()
            .set_ex(refresh_key(&record.refresh_token), &record.id, keep as u64)
            .ignore()
            .sadd(user_key(user_id), &record.id)
            .ignore()
            .expire(user_key(user_id), keep)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(record)
    }

    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let mut conn = self.conn();
        let id: Option<String> = conn.get(refresh_key(refresh_token)).await?;
        let Some(id) = id else {
            return Ok(None);
        };
        let map: HashMap<String, String> = conn.hgetall(session_key(&id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(from_map(map)?))
    }

    async fn rotate(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let now = Utc::now();
        let new_token = new_refresh_token();
        let script = redis::Script::new(
            r#"
            local old = redis.call("HGET", KEYS[1], "refresh_token")
            if not old then
                return nil
            end
            redis.call("DEL", "refresh:" .. old)
            redis.call("HSET", KEYS[1],
                "refresh_token", ARGV[1],
                "expires_at", ARGV[2],
                "last_accessed_at", ARGV[3])
            redis.call("SET", "refresh:" .. ARGV[1], ARGV[4])
            redis.call("EXPIRE", KEYS[1], ARGV[5])
            redis.call("EXPIRE", "refresh:" .. ARGV[1], ARGV[5])
            return redis.call("HGETALL", KEYS[1])
        "#,
        );

        let mut conn = self.conn();
        let map: Option<HashMap<String, String>> = script
            .key(session_key(session_id))
            .arg(&new_token)
            .arg((now + ttl).to_rfc3339())
            .arg(now.to_rfc3339())
            .arg(session_id)
            .arg(grace_ttl(ttl))
            .invoke_async(&mut conn)
            .await?;

        match map {
            Some(map) if !map.is_empty() => Ok(Some(from_map(map)?)),
            _ => Ok(None),
        }
    }

    async fn touch(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(session_key(session_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        let mut record = from_map(map)?;

        let now = Utc::now();
        if record.is_expired(now) {
            self.revoke(session_id).await?;
            return Ok(None);
        }

        conn.hset::<_, _, _, ()>(session_key(session_id), "last_accessed_at", now.to_rfc3339())
            .await?;
        record.last_accessed_at = now;
        Ok(Some(record))
    }

    async fn revoke(&self, session_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(session_key(session_id)).await?;
        if map.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic().del(session_key(session_id)).ignore();
        if let Some(token) = map.get("refresh_token") {
            pipe.del(refresh_key(token)).ignore();
        }
        if let Some(user_id) = map.get("user_id") {
            pipe.srem(user_key(user_id), session_id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<SessionRecord>> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn.smembers(user_key(user_id)).await?;

        let now = Utc::now();
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            let map: HashMap<String, String> = conn.hgetall(session_key(&id)).await?;
            if map.is_empty() {
                // Stale member left behind by key expiry.
                conn.srem::<_, _, ()>(user_key(user_id), &id).await?;
                continue;
            }
            let record = from_map(map)?;
            if !record.is_expired(now) {
                sessions.push(record);
            }
        }
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    async fn find_owned(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(session_key(session_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        let record = from_map(map)?;
        if record.user_id != user_id || record.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(record))
    }
}
