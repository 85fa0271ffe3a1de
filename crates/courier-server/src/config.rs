//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use courier_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_WORKER_COUNT, WEBHOOK_MAX_RETRIES, WEBHOOK_TIMEOUT_SECS,
};

/// Passphrase used when `SECRET_KEY` is unset.  Development only.
const DEV_SECRET_KEY: &str = "courier-dev-secret-key";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory, `courier.db`.
    pub database_path: Option<PathBuf>,

    /// Passphrase from which the at-rest webhook secret key is derived.
    /// Env: `SECRET_KEY`
    /// Default: a fixed development passphrase.
    pub secret_key: String,

    /// Number of queue workers.
    /// Env: `WORKER_COUNT`
    /// Default: `10`
    pub worker_count: usize,

    /// How long an idle worker sleeps before polling again.
    /// Env: `QUEUE_POLL_INTERVAL_MS`
    /// Default: `1000`
    pub queue_poll_interval: Duration,

    /// How long a claimed job stays hidden from other workers.
    /// Env: `JOB_VISIBILITY_SECS`
    /// Default: `300`
    pub job_visibility: Duration,

    /// Outbound webhook request timeout.
    /// Env: `WEBHOOK_TIMEOUT_SECS`
    /// Default: `30`
    pub webhook_timeout: Duration,

    /// Retry ceiling for webhook fan-out jobs.
    /// Env: `WEBHOOK_MAX_RETRIES`
    /// Default: `5`
    pub webhook_max_retries: u32,

    /// Timeout for subscription confirmation and signing-certificate fetches.
    /// Env: `CONFIRM_TIMEOUT_SECS`
    /// Default: `10`
    pub confirm_timeout: Duration,

    /// Verify provider envelope signatures before processing.
    /// Env: `VERIFY_SNS_SIGNATURES` (true/false)
    /// Default: `false`
    pub verify_signatures: bool,

    /// Nameserver used for DNSBL lookups (`ip:port`).
    /// Env: `DNS_NAMESERVER`
    /// Default: unset, system resolver configuration.
    pub dns_nameserver: Option<SocketAddr>,

    /// Per-query DNS timeout.
    /// Env: `DNS_TIMEOUT_SECS`
    /// Default: `5`
    pub dns_timeout: Duration,

    /// Domain used for the alert digest sender address.
    /// Env: `APP_DOMAIN`
    /// Default: `localhost`
    pub app_domain: String,

    /// Base URL of the dashboard, used in digest links.
    /// Env: `WEB_URL`
    /// Default: `http://localhost:3000`
    pub web_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            secret_key: DEV_SECRET_KEY.to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            queue_poll_interval: Duration::from_millis(1000),
            job_visibility: Duration::from_secs(300),
            webhook_timeout: Duration::from_secs(WEBHOOK_TIMEOUT_SECS),
            webhook_max_retries: WEBHOOK_MAX_RETRIES,
            confirm_timeout: Duration::from_secs(10),
            verify_signatures: false,
            dns_nameserver: None,
            dns_timeout: Duration::from_secs(5),
            app_domain: "localhost".to_string(),
            web_url: "http://localhost:3000".to_string(),
        }
    }
}

// Hand-written so the secret key never reaches the logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("secret_key", &"<redacted>")
            .field("worker_count", &self.worker_count)
            .field("queue_poll_interval", &self.queue_poll_interval)
            .field("job_visibility", &self.job_visibility)
            .field("webhook_timeout", &self.webhook_timeout)
            .field("webhook_max_retries", &self.webhook_max_retries)
            .field("confirm_timeout", &self.confirm_timeout)
            .field("verify_signatures", &self.verify_signatures)
            .field("dns_nameserver", &self.dns_nameserver)
            .field("dns_timeout", &self.dns_timeout)
            .field("app_domain", &self.app_domain)
            .field("web_url", &self.web_url)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        match lookup("SECRET_KEY") {
            Some(key) if !key.is_empty() => config.secret_key = key,
            _ => tracing::warn!("SECRET_KEY not set, using development key (dev-only)"),
        }

        if let Some(n) = parse_number::<usize>(&lookup, "WORKER_COUNT") {
            config.worker_count = n.max(1);
        }

        if let Some(ms) = parse_number::<u64>(&lookup, "QUEUE_POLL_INTERVAL_MS") {
            config.queue_poll_interval = Duration::from_millis(ms.max(10));
        }

        if let Some(secs) = parse_number::<u64>(&lookup, "JOB_VISIBILITY_SECS") {
            config.job_visibility = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = parse_number::<u64>(&lookup, "WEBHOOK_TIMEOUT_SECS") {
            config.webhook_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(n) = parse_number::<u32>(&lookup, "WEBHOOK_MAX_RETRIES") {
            config.webhook_max_retries = n;
        }

        if let Some(secs) = parse_number::<u64>(&lookup, "CONFIRM_TIMEOUT_SECS") {
            config.confirm_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(val) = lookup("VERIFY_SNS_SIGNATURES") {
            config.verify_signatures = val == "true" || val == "1";
        }

        if let Some(addr) = lookup("DNS_NAMESERVER") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.dns_nameserver = Some(parsed),
                Err(_) => {
                    tracing::warn!(value = %addr, "Invalid DNS_NAMESERVER, using system resolver")
                }
            }
        }

        if let Some(secs) = parse_number::<u64>(&lookup, "DNS_TIMEOUT_SECS") {
            config.dns_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(domain) = lookup("APP_DOMAIN") {
            config.app_domain = domain;
        }

        if let Some(url) = lookup("WEB_URL") {
            config.web_url = url.trim_end_matches('/').to_string();
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}
