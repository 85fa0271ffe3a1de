use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Unknown value for {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid encoding: {0}")]
    Encoding(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid timestamp header: {0}")]
    InvalidTimestamp(String),

    #[error("Timestamp outside tolerance ({age_secs}s old, tolerance {tolerance_secs}s)")]
    Expired { age_secs: i64, tolerance_secs: i64 },

    #[error("Signature mismatch")]
    Mismatch,

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}
