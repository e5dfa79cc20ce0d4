//! Environment-driven configuration.
//!
//! Everything is read from `AUTHGATE_*` variables, with a `.env` file loaded
//! first when present. Secrets are an ordered, comma-separated list: the
//! first entry signs new tokens, every entry verifies, which is what makes
//! zero-downtime key rotation work.

use anyhow::{bail, Context};

const PLACEHOLDER_SECRET: &str = "change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub token_secrets: Vec<String>,
    pub redis_url: Option<String>,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub idempotency_ttl_secs: i64,
    pub default_rate_limit: u32,
    pub default_rate_limit_window_ms: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let raw_secrets =
            std::env::var("AUTHGATE_TOKEN_SECRETS").unwrap_or_else(|_| PLACEHOLDER_SECRET.into());
        let token_secrets = parse_secrets(&raw_secrets)?;

        if token_secrets.iter().any(|s| s == PLACEHOLDER_SECRET) {
            let env = std::env::var("AUTHGATE_ENV")
                .or_else(|_| std::env::var("RUST_ENV"))
                .unwrap_or_else(|_| "development".into());
            if env == "production" {
                bail!("AUTHGATE_TOKEN_SECRETS is unset or still the placeholder; refusing to start in production");
            }
            eprintln!(
                "WARNING: using the placeholder token secret; set AUTHGATE_TOKEN_SECRETS before deploying"
            );
        }

        Ok(Self {
            port: env_parse("AUTHGATE_PORT", 8080)?,
            token_secrets,
            redis_url: std::env::var("AUTHGATE_REDIS_URL").ok().filter(|s| !s.is_empty()),
            access_ttl_secs: env_parse("AUTHGATE_ACCESS_TTL_SECS", 900)?,
            refresh_ttl_secs: env_parse("AUTHGATE_REFRESH_TTL_SECS", 30 * 24 * 60 * 60)?,
            idempotency_ttl_secs: env_parse("AUTHGATE_IDEMPOTENCY_TTL_SECS", 24 * 60 * 60)?,
            default_rate_limit: env_parse("AUTHGATE_DEFAULT_RATE_LIMIT", 60)?,
            default_rate_limit_window_ms: env_parse("AUTHGATE_DEFAULT_RATE_WINDOW_MS", 60_000)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} has an unparseable value: {raw}")),
        Err(_) => Ok(default),
    }
}

fn parse_secrets(raw: &str) -> anyhow::Result<Vec<String>> {
    let secrets: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if secrets.is_empty() {
        bail!("AUTHGATE_TOKEN_SECRETS must contain at least one secret");
    }
    Ok(secrets)
}
