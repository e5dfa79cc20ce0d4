//! Idempotency replay cache.
//!
//! Mutating requests carry an `Idempotency-Key` header. The first execution
//! of a given (key, method, url, caller) records the full response; retries
//! inside the TTL replay that recording byte-for-byte, marked with
//! `X-Idempotent-Replay: true`, instead of re-running the handler. Failed
//! responses (4xx/5xx) are never cached, so a client may retry them with the
//! same key.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::auth::AuthenticatedUser;
use crate::errors::AppError;
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_MARKER_HEADER: &str = "x-idempotent-replay";

/// Largest response body the cache will buffer.
const MAX_CACHED_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct IdempotencyCache {
    records: DashMap<String, IdempotencyRecord>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Scopes the raw client key to the operation (and caller, when known),
    /// so the same key sent to a different endpoint is a different entry.
    pub fn build_key(key: &str, method: &Method, url: &str, user_id: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(b"|");
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(url.as_bytes());
        if let Some(user_id) = user_id {
            hasher.update(b"|");
            hasher.update(user_id.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Expiry is lazy: a hit past its TTL is dropped on observation.
    pub fn get(&self, cache_key: &str) -> Option<IdempotencyRecord> {
        let expired = match self.records.get(cache_key) {
            Some(record) if record.expires_at > Utc::now() => return Some(record.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.records.remove(cache_key);
        }
        None
    }

    pub fn save(&self, cache_key: String, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) {
        let now = Utc::now();
        self.records.insert(
            cache_key,
            IdempotencyRecord {
                status,
                headers,
                body,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Periodic sweep companion to the lazy expiry in `get`.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-route state: whether the key header is mandatory on this route.
#[derive(Clone)]
pub struct RouteIdempotency {
    pub state: Arc<AppState>,
    pub required: bool,
}

pub async fn replay_or_execute(
    State(route): State<RouteIdempotency>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        return Ok(next.run(req).await);
    }

    let key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from);
    let Some(key) = key else {
        if route.required {
            return Err(AppError::MissingIdempotencyKey);
        }
        return Ok(next.run(req).await);
    };

    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let user_id = req
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.id.clone());
    let cache_key =
        IdempotencyCache::build_key(&key, req.method(), &url, user_id.as_deref());

    if let Some(record) = route.state.idempotency.get(&cache_key) {
        return Ok(replay(record));
    }

    let response = next.run(req).await;
    if response.status().as_u16() >= 400 {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, MAX_CACHED_BODY_BYTES)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response body unreadable: {e}")))?;

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| {
            name.as_str() != CONTENT_LENGTH.as_str() && name.as_str() != REPLAY_MARKER_HEADER
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    route
        .state
        .idempotency
        .save(cache_key, parts.status.as_u16(), headers, bytes.to_vec());

    parts.headers.insert(
        HeaderName::from_static(REPLAY_MARKER_HEADER),
        HeaderValue::from_static("false"),
    );
    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn replay(record: IdempotencyRecord) -> Response {
    let mut response = Response::new(Body::from(record.body));
    *response.status_mut() =
        StatusCode::from_u16(record.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (name, value) in record.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response.headers_mut().insert(
        HeaderName::from_static(REPLAY_MARKER_HEADER),
        HeaderValue::from_static("true"),
    );
    response
}
