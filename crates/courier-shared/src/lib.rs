//! Types, constants and crypto primitives shared by every Courier crate.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod jobs;
pub mod signature;
pub mod types;

pub use error::{CourierError, CryptoError, SignatureError};
