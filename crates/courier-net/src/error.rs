use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("DNS resolution failed: {0}")]
    Resolve(#[from] hickory_resolver::error::ResolveError),

    #[error("Could not read system resolver configuration: {0}")]
    SystemConfig(String),

    #[error("DNS lookup for {0} timed out")]
    Timeout(String),

    #[error("Unsupported address for DNSBL lookup: {0}")]
    UnsupportedAddress(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
