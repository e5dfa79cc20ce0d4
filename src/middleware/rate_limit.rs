//! Token-bucket rate limiting.
//!
//! Each key owns a bucket of `limit` tokens that refills continuously at
//! `limit / window_ms` tokens per millisecond, clamped to capacity. A
//! request spends one whole token; fractional balances carry over, so a
//! steady client gets exactly the configured rate with no cliff at the
//! window edge.
//!
//! A request is checked against several keys at once (endpoint, ip, and the
//! identity keys when the caller is authenticated). All buckets are charged;
//! if any denies, the response is 429 with the largest retry hint among the
//! denying buckets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::auth::AuthenticatedUser;
use crate::errors::AppError;
use crate::AppState;

pub const DEVICE_ID_HEADER: &str = "x-device-id";

#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub limit: u32,
    pub window_ms: u64,
}

impl RatePolicy {
    pub const fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::new(60, 60_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: Option<u64>,
}

struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    /// Monotonic zero point; bucket timestamps are milliseconds since this.
    epoch: Instant,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
            epoch: Instant::now(),
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn consume(&self, key: &str, policy: RatePolicy) -> RateDecision {
        self.consume_at(key, policy, self.now_ms())
    }

    /// Core decision with an injectable clock, in milliseconds since the
    /// limiter's epoch. Runs as a single read-modify-write under the entry's
    /// shard lock, so two racing requests cannot both spend the last token.
    pub fn consume_at(&self, key: &str, policy: RatePolicy, now_ms: u64) -> RateDecision {
        let capacity = f64::from(policy.limit);
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill_ms: now_ms,
            });

        let elapsed = now_ms.saturating_sub(bucket.last_refill_ms);
        if elapsed > 0 {
            let refill = elapsed as f64 * capacity / policy.window_ms as f64;
            bucket.tokens = (bucket.tokens + refill).min(capacity);
            bucket.last_refill_ms = now_ms;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision {
                allowed: true,
                retry_after_secs: None,
            };
        }

        let deficit = 1.0 - bucket.tokens;
        let wait_ms = deficit * policy.window_ms as f64 / capacity;
        RateDecision {
            allowed: false,
            retry_after_secs: Some(((wait_ms / 1000.0).ceil() as u64).max(1)),
        }
    }

    /// Drops buckets untouched for `idle` or longer. Returns how many went.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        self.evict_idle_at(idle, self.now_ms())
    }

    fn evict_idle_at(&self, idle: Duration, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(idle.as_millis() as u64);
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.last_refill_ms >= cutoff);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Per-route state: the shared limiter plus this route's policy.
#[derive(Clone)]
pub struct RouteRatePolicy {
    pub state: Arc<AppState>,
    pub policy: RatePolicy,
}

pub async fn enforce(
    State(route): State<RouteRatePolicy>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let mut keys = Vec::with_capacity(5);
    keys.push(format!("endpoint:{}:{}", req.method(), req.uri().path()));
    keys.push(format!("ip:{}", client_ip(&req)));
    if let Some(device) = req
        .headers()
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        keys.push(format!("device:{device}"));
    }
    if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
        keys.push(format!("user:{}", user.id));
        keys.push(format!("session:{}", user.session_id));
    }

    let mut retry_after: Option<u64> = None;
    for key in &keys {
        let decision = route.state.limiter.consume(key, route.policy);
        if !decision.allowed {
            retry_after = retry_after.max(decision.retry_after_secs);
        }
    }

    if let Some(retry_after_secs) = retry_after {
        return Err(AppError::RateLimitExceeded { retry_after_secs });
    }
    Ok(next.run(req).await)
}

fn client_ip(req: &Request) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: RatePolicy = RatePolicy::new(5, 60_000);

    #[test]
    fn capacity_is_honored_exactly() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.consume_at("k", POLICY, 0).allowed);
        }
        let denied = limiter.consume_at("k", POLICY, 0);
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs.unwrap() >= 1);
    }

    #[test]
    fn refill_is_continuous_and_fractional() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.consume_at("k", POLICY, 0);
        }
        assert!(!limiter.consume_at("k", POLICY, 0).allowed);

        // One window-fifth later exactly one token has come back.
        assert!(limiter.consume_at("k", POLICY, 12_000).allowed);
        assert!(!limiter.consume_at("k", POLICY, 12_000).allowed);
    }

    #[test]
    fn refill_clamps_at_capacity() {
        let limiter = RateLimiter::new();
        limiter.consume_at("k", POLICY, 0);

        // Ten windows of idleness never over-fills the bucket.
        for _ in 0..5 {
            assert!(limiter.consume_at("k", POLICY, 600_000).allowed);
        }
        assert!(!limiter.consume_at("k", POLICY, 600_000).allowed);
    }

    #[test]
    fn retry_hint_is_never_zero() {
        let limiter = RateLimiter::new();
        let policy = RatePolicy::new(1000, 1_000);
        for _ in 0..1000 {
            limiter.consume_at("k", policy, 0);
        }
        // The true wait is 1ms; the hint still rounds up to a whole second.
        let denied = limiter.consume_at("k", policy, 0);
        assert_eq!(denied.retry_after_secs, Some(1));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.consume_at("a", POLICY, 0).allowed);
        }
        assert!(!limiter.consume_at("a", POLICY, 0).allowed);
        assert!(limiter.consume_at("b", POLICY, 0).allowed);
    }

    #[test]
    fn evict_idle_drops_stale_buckets_only() {
        let limiter = RateLimiter::new();
        limiter.consume_at("stale", POLICY, 1_000);
        limiter.consume_at("fresh", POLICY, 3_600_000);
        assert_eq!(limiter.len(), 2);

        let evicted = limiter.evict_idle_at(Duration::from_secs(1800), 3_700_000);
        assert_eq!(evicted, 1);
        assert_eq!(limiter.len(), 1);
        assert!(limiter.buckets.contains_key("fresh"));
    }
}
