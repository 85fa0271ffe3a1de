//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_shared::types::{
    AlertKind, AlertSeverity, BounceKind, CallOutcome, DeliveryEventKind, MessageStatus,
    SuppressionReason, WarmupStatus,
};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The two tables a provider message id can resolve into.
///
/// Table names used in dynamic SQL come only from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTable {
    /// `transactional_emails`, checked first.
    Transactional,
    /// `emails`, the inbound-tracked fallback.
    Inbound,
}

impl MessageTable {
    /// Lookup order for provider message ids.
    pub const LOOKUP_ORDER: [MessageTable; 2] = [MessageTable::Transactional, MessageTable::Inbound];

    pub fn table_name(&self) -> &'static str {
        match self {
            MessageTable::Transactional => "transactional_emails",
            MessageTable::Inbound => "emails",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        match name {
            "transactional_emails" => Some(MessageTable::Transactional),
            "emails" => Some(MessageTable::Inbound),
            _ => None,
        }
    }
}

/// A resolved message: which table it lives in, its id and its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub table: MessageTable,
    pub id: Uuid,
    pub org_id: Uuid,
}

/// Full message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub table: MessageTable,
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider_message_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub status: MessageStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub bounce_type: Option<BounceKind>,
    pub bounce_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a message row (the external sender's side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider_message_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Delivery events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: i64,
    pub message: MessageRef,
    pub kind: DeliveryEventKind,
    pub details: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeliveryEvent {
    pub kind: DeliveryEventKind,
    pub details: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl NewDeliveryEvent {
    pub fn new(kind: DeliveryEventKind, details: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            details: details.into(),
            ip_address: None,
            user_agent: None,
            occurred_at: at,
        }
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address.filter(|s| !s.is_empty());
        self.user_agent = user_agent.filter(|s| !s.is_empty());
        self
    }
}

// ---------------------------------------------------------------------------
// Suppression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub org_id: Uuid,
    /// Always lower-cased.
    pub email: String,
    pub reason: SuppressionReason,
    pub source: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// A subscriber endpoint.  `secret` is the sealed at-rest form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.active && self.events.iter().any(|e| e == event)
    }
}

/// One delivery attempt as recorded in `webhook_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookCall {
    pub id: i64,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub response_status: Option<u16>,
    pub response_time_ms: i64,
    pub status: CallOutcome,
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookCall {
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub response_status: Option<u16>,
    pub response_time_ms: i64,
    pub status: CallOutcome,
    pub attempts: u32,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Deliverability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupProgress {
    pub id: i64,
    pub org_id: Uuid,
    pub ip_address: String,
    pub schedule_name: String,
    pub current_day: i64,
    pub status: WarmupStatus,
    pub pause_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An `(org, ip)` pair currently warming up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WarmingIp {
    pub org_id: Uuid,
    pub ip_address: String,
}

/// Result of checking one IP against one DNSBL zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RblResult {
    pub rbl: String,
    pub zone: String,
    pub listed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub delist_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistCheck {
    pub ip_address: String,
    pub listed_count: usize,
    pub results: Vec<RblResult>,
    pub checked_at: DateTime<Utc>,
}

impl BlacklistCheck {
    pub fn listed(&self) -> impl Iterator<Item = &RblResult> {
        self.results.iter().filter(|r| r.listed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub org_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub org_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

/// Per-org message volume over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BounceStats {
    pub org_id: Uuid,
    pub total: i64,
    pub bounced: i64,
}

impl BounceStats {
    /// Bounce rate as a percentage.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.bounced as f64 / self.total as f64 * 100.0
        }
    }
}

/// An org with unacknowledged alerts, joined with its owner's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestTarget {
    pub org_id: Uuid,
    pub org_name: String,
    pub owner_email: String,
    pub alert_count: i64,
    pub critical_count: i64,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub queue: String,
    pub payload: serde_json::Value,
    /// Attempts that already failed before this claim.
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
}

/// What happened to a job after [`Database::fail_job`].
///
/// [`Database::fail_job`]: crate::Database::fail_job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    Retrying { attempts: u32, run_at: DateTime<Utc> },
    Dead { attempts: u32 },
}
