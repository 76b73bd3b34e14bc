//! Process configuration, loaded from environment variables. Mirrors the
//! teacher's `dotenvy` + `std::env` pattern rather than a config-file crate,
//! since the source system configures itself purely from the environment.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Scheduler fire-loop tick interval.
    pub scheduler_tick_interval: Duration,
    /// Per-consumer bounded in-flight window (spec §5 "Backpressure").
    pub queue_prefetch: usize,
    pub extract_worker_concurrency: usize,
    pub transform_worker_concurrency: usize,
    pub load_worker_concurrency: usize,
    pub vectorize_worker_concurrency: usize,
    /// Per-call adapter page fetch timeout (spec §5, default 60s).
    pub adapter_fetch_timeout: Duration,
    /// Abandonment multiplier applied to `max(schedule_interval,
    /// retry_interval)` (spec §4.1; the spec marks the `×3` as a proposal).
    pub abandonment_multiplier: u32,
    pub gateway_bind_addr: String,
    /// Primary credentials-encryption key, "key_id:base64_key".
    pub credentials_encryption_key: String,
    pub credentials_encryption_key_previous: Vec<String>,
    pub jwt_hmac_secret: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedding_base_url: String,
    pub embedding_api_key: String,
}

impl Config {
    /// Load configuration from the process environment, reading a `.env`
    /// file first if present (no-op in production where env is injected
    /// by the orchestrator).
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            scheduler_tick_interval: Duration::from_secs(parse_env_or("SCHEDULER_TICK_SECONDS", 5)?),
            queue_prefetch: parse_env_or("QUEUE_PREFETCH", 16)?,
            extract_worker_concurrency: parse_env_or("EXTRACT_WORKER_CONCURRENCY", 4)?,
            transform_worker_concurrency: parse_env_or("TRANSFORM_WORKER_CONCURRENCY", 8)?,
            load_worker_concurrency: parse_env_or("LOAD_WORKER_CONCURRENCY", 4)?,
            vectorize_worker_concurrency: parse_env_or("VECTORIZE_WORKER_CONCURRENCY", 4)?,
            adapter_fetch_timeout: Duration::from_secs(parse_env_or("ADAPTER_FETCH_TIMEOUT_SECONDS", 60)?),
            abandonment_multiplier: parse_env_or("ABANDONMENT_MULTIPLIER", 3)?,
            gateway_bind_addr: std::env::var("GATEWAY_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8090".to_string()),
            credentials_encryption_key: require_env("SECRETS_ENCRYPTION_KEY")?,
            credentials_encryption_key_previous: std::env::var("SECRETS_ENCRYPTION_KEY_PREVIOUS")
                .ok()
                .into_iter()
                .collect(),
            jwt_hmac_secret: require_env("JWT_HMAC_SECRET")?,
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: parse_env_or("EMBEDDING_DIMENSION", 1536)?,
            embedding_base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").unwrap_or_default(),
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable: {key}"))
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
