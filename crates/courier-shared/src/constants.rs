use crate::types::DnsblZone;

/// Application name
pub const APP_NAME: &str = "Courier";

/// User-Agent sent with every outbound webhook request
pub const WEBHOOK_USER_AGENT: &str = "Courier-Webhook/1.0";

/// Header carrying the unix timestamp covered by the signature
pub const HEADER_WEBHOOK_TIMESTAMP: &str = "X-Webhook-Timestamp";

/// Header carrying the hex HMAC-SHA256 signature
pub const HEADER_WEBHOOK_SIGNATURE: &str = "X-Webhook-Signature";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Key derivation context (BLAKE3) for at-rest webhook secrets
pub const KDF_CONTEXT_SECRET_KEY: &str = "courier-webhook-secret-key-v1";

/// Default replay window for signature verification, in seconds
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Outbound webhook request timeout in seconds
pub const WEBHOOK_TIMEOUT_SECS: u64 = 30;

/// Retry ceiling for webhook fan-out jobs
pub const WEBHOOK_MAX_RETRIES: u32 = 5;

/// Subscriber response bodies are truncated to this many bytes in error text
pub const WEBHOOK_RESPONSE_BODY_LIMIT: usize = 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default number of queue workers
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Minimum messages in the trailing window before a bounce rate is evaluated
pub const BOUNCE_MIN_VOLUME: i64 = 100;

/// Bounce rate (percent) above which an alert is raised
pub const BOUNCE_ALERT_THRESHOLD: f64 = 3.0;

/// Bounce rate (percent) above which sending is paused
pub const BOUNCE_PAUSE_THRESHOLD: f64 = 5.0;

/// Trailing window for bounce-rate and digest evaluation, in hours
pub const MONITOR_WINDOW_HOURS: i64 = 24;

/// A warmup is complete once its day counter passes this value
pub const WARMUP_DURATION_DAYS: i64 = 30;

/// Sender-side retry ceiling for alert digest emails
pub const DIGEST_MAX_RETRIES: u32 = 3;

/// DNS blacklists checked for every warming IP
pub const DNSBL_ZONES: [DnsblZone; 5] = [
    DnsblZone {
        name: "Spamhaus ZEN",
        zone: "zen.spamhaus.org",
        delist_url: "https://www.spamhaus.org/query/ip/",
    },
    DnsblZone {
        name: "Spamcop",
        zone: "bl.spamcop.net",
        delist_url: "https://www.spamcop.net/bl.shtml?",
    },
    DnsblZone {
        name: "Barracuda",
        zone: "b.barracudacentral.org",
        delist_url: "https://www.barracudacentral.org/lookups",
    },
    DnsblZone {
        name: "SORBS",
        zone: "dnsbl.sorbs.net",
        delist_url: "https://www.sorbs.net/lookup.shtml",
    },
    DnsblZone {
        name: "SpamEatingMonkey",
        zone: "bl.spameatingmonkey.net",
        delist_url: "https://spameatingmonkey.com/services/",
    },
];
