//! Environment-variable configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Reads an environment variable, falling back to a default.
#[must_use]
pub fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Reads and parses an environment variable, falling back on absence or a
/// parse failure.
#[must_use]
pub fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Reads a duration given as whole seconds.
#[must_use]
pub fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

/// Raw configuration from the environment.
///
/// Durations (`RETRY_DELAY`, `LOG_FLUSH_INTERVAL`) are whole seconds.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// `ELLIO_BOOTSTRAP` — the bootstrap token (required).
    pub bootstrap_token: String,
    /// `PORT` — decision/health listener (default 8080).
    pub port: u16,
    /// `METRICS_PORT` — Prometheus listener (default 9090).
    pub metrics_port: u16,
    /// `LOG_LEVEL` — tracing filter fallback (default `info`).
    pub log_level: String,
    /// `MAX_RETRY_ATTEMPTS` — EDL fetch attempts (default 3).
    pub max_retry_attempts: u32,
    /// `RETRY_DELAY` — base EDL retry delay in seconds (default 30).
    pub retry_delay: Duration,
    /// `LOG_BATCH_SIZE` — events per shipped batch (default 100).
    pub log_batch_size: usize,
    /// `LOG_FLUSH_INTERVAL` — shipper flush period in seconds (default 10).
    pub log_flush_interval: Duration,
    /// `LEAKY_BUCKET_CAPACITY` — shipping rate-limit burst (default 1000).
    pub leaky_bucket_capacity: i64,
    /// `LEAKY_BUCKET_REFILL_RATE` — tokens per second (default 100).
    pub leaky_bucket_refill_rate: i64,
    /// `LOG_BUFFER_SIZE` — overflow buffer capacity (default 10000).
    pub log_buffer_size: usize,
    /// `IP_HEADER_OVERRIDE` — header consulted before the standard ones.
    pub ip_header_override: Option<String>,
    /// `WARDEN_STATIC_DIR` — where the 403 page and static assets live.
    pub static_dir: PathBuf,
}

impl EnvConfig {
    /// Loads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let ip_header_override = env_or("IP_HEADER_OVERRIDE", "");
        Self {
            bootstrap_token: env_or("ELLIO_BOOTSTRAP", ""),
            port: env_parse("PORT", 8080),
            metrics_port: env_parse("METRICS_PORT", 9090),
            log_level: env_or("LOG_LEVEL", "info"),
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", 3),
            retry_delay: env_duration_secs("RETRY_DELAY", Duration::from_secs(30)),
            log_batch_size: env_parse("LOG_BATCH_SIZE", 100),
            log_flush_interval: env_duration_secs("LOG_FLUSH_INTERVAL", Duration::from_secs(10)),
            leaky_bucket_capacity: env_parse("LEAKY_BUCKET_CAPACITY", 1000),
            leaky_bucket_refill_rate: env_parse("LEAKY_BUCKET_REFILL_RATE", 100),
            log_buffer_size: env_parse("LOG_BUFFER_SIZE", 10_000),
            ip_header_override: (!ip_header_override.is_empty()).then_some(ip_header_override),
            static_dir: PathBuf::from(env_or("WARDEN_STATIC_DIR", "/static")),
        }
    }
}
