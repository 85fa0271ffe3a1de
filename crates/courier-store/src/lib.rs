//! # courier-store
//!
//! Persistent state for the Courier deliverability pipeline, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed operations for every table the
//! pipeline touches: message status transitions, delivery events, the
//! suppression list, webhooks and their call history, warmup progress,
//! blacklist sweeps, alerts and the durable job table.

pub mod alerts;
pub mod blacklist;
pub mod codec;
pub mod contacts;
pub mod database;
pub mod events;
pub mod jobs;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod orgs;
pub mod suppression;
pub mod warmup;
pub mod webhooks;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use jobs::retry_backoff;
pub use models::*;
