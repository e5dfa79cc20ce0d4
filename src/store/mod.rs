//! Session persistence — the single source of truth for session existence
//! and refresh-token ownership.
//!
//! Two backends implement [`SessionStore`]: an in-memory store for a single
//! process and a Redis-backed store for multi-instance deployments. Callers
//! receive the store as `Arc<dyn SessionStore>`; nothing in the crate relies
//! on a process-wide singleton.

pub mod memory;
pub mod redis;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive metadata about the device a session was created from.
/// Informational only — never consulted for authorization decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// One authenticated device/browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Generate a fresh refresh token: 48 random bytes from the OS CSPRNG,
/// hex encoded. 384 bits of entropy makes brute force infeasible.
pub fn new_refresh_token() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 48];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session for `user_id` with a fresh id and refresh token,
    /// expiring at `now + ttl`, and index it by refresh token.
    async fn create(
        &self,
        user_id: &str,
        ttl: Duration,
        device: Option<DeviceInfo>,
    ) -> anyhow::Result<SessionRecord>;

    /// O(1) lookup via the refresh-token index. Expiry is deliberately not
    /// checked here: the refresh flow distinguishes an expired token (which
    /// revokes the session) from an unknown one.
    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> anyhow::Result<Option<SessionRecord>>;

    /// Replace the refresh token, extend expiry, and bump last access —
    /// atomically with respect to the refresh-token index. Returns `None`
    /// when the session no longer exists. Rotation-on-use is what turns a
    /// stolen refresh token into a dead one after its legitimate redemption.
    async fn rotate(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<SessionRecord>>;

    /// Bump `last_accessed_at`. An expired session is revoked and reported
    /// absent so it cannot be resurrected by continued use.
    async fn touch(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>>;

    /// Remove the session and its refresh-token index entry. Idempotent.
    async fn revoke(&self, session_id: &str) -> anyhow::Result<()>;

    /// Live sessions owned by `user_id`, most recently accessed first.
    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<SessionRecord>>;

    /// The live session `session_id` if — and only if — `user_id` owns it.
    async fn find_owned(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> anyhow::Result<Option<SessionRecord>>;
}
