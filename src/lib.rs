//! authgate — session-token authentication and request governance.
//!
//! The crate wires four cores behind an axum HTTP surface: an HMAC token
//! codec, a pluggable session store (in-process or Redis), a token-bucket
//! rate limiter, and an idempotency replay cache. [`AppState`] owns the lot
//! and is shared across every route.

pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod store;
pub mod token;
pub mod users;

use std::sync::Arc;

use crate::audit::TracingAuditSink;
use crate::auth::AuthService;
use crate::config::Config;
use crate::middleware::idempotency::IdempotencyCache;
use crate::middleware::rate_limit::RateLimiter;
use crate::store::memory::MemorySessionStore;
use crate::store::redis::RedisSessionStore;
use crate::store::SessionStore;
use crate::token::TokenCodec;
use crate::users::UserDirectory;

pub struct AppState {
    pub auth: AuthService,
    pub limiter: RateLimiter,
    pub idempotency: IdempotencyCache,
    pub config: Config,
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        let sessions: Arc<dyn SessionStore> = match &config.redis_url {
            Some(url) => {
                tracing::info!("using redis session store");
                Arc::new(RedisSessionStore::connect(url).await?)
            }
            None => {
                tracing::info!("using in-memory session store");
                Arc::new(MemorySessionStore::new())
            }
        };

        let auth = AuthService::new(
            TokenCodec::new(config.token_secrets.clone())?,
            sessions,
            Arc::new(UserDirectory::seeded()?),
            Arc::new(TracingAuditSink),
            config.access_ttl_secs,
            config.refresh_ttl_secs,
        );

        Ok(Arc::new(Self {
            auth,
            limiter: RateLimiter::new(),
            idempotency: IdempotencyCache::new(chrono::Duration::seconds(
                config.idempotency_ttl_secs,
            )),
            config,
        }))
    }
}
