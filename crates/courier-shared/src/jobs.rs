//! Job kinds and typed payloads carried by the job queue.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every job kind the queue knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "webhook:deliver")]
    WebhookDeliver,
    #[serde(rename = "email:send")]
    EmailSend,
    #[serde(rename = "scheduled:blacklist-check")]
    BlacklistCheck,
    #[serde(rename = "scheduled:warmup-advance")]
    WarmupAdvance,
    #[serde(rename = "scheduled:bounce-check")]
    BounceCheck,
    #[serde(rename = "scheduled:alert-digest")]
    AlertDigest,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::WebhookDeliver => "webhook:deliver",
            JobKind::EmailSend => "email:send",
            JobKind::BlacklistCheck => "scheduled:blacklist-check",
            JobKind::WarmupAdvance => "scheduled:warmup-advance",
            JobKind::BounceCheck => "scheduled:bounce-check",
            JobKind::AlertDigest => "scheduled:alert-digest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook:deliver" => Some(JobKind::WebhookDeliver),
            "email:send" => Some(JobKind::EmailSend),
            "scheduled:blacklist-check" => Some(JobKind::BlacklistCheck),
            "scheduled:warmup-advance" => Some(JobKind::WarmupAdvance),
            "scheduled:bounce-check" => Some(JobKind::BounceCheck),
            "scheduled:alert-digest" => Some(JobKind::AlertDigest),
            _ => None,
        }
    }

    /// Queue a job of this kind lands on unless the caller overrides it.
    pub fn default_queue(&self) -> QueueName {
        match self {
            JobKind::WebhookDeliver => QueueName::Default,
            JobKind::EmailSend => QueueName::Critical,
            JobKind::BlacklistCheck
            | JobKind::WarmupAdvance
            | JobKind::BounceCheck
            | JobKind::AlertDigest => QueueName::Scheduled,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Critical,
    Default,
    Scheduled,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Default => "default",
            QueueName::Scheduled => "scheduled",
        }
    }
}

/// One outbound webhook delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliverPayload {
    pub webhook_id: Uuid,
    pub org_id: Uuid,
    pub url: String,
    /// Plaintext signing secret; empty means the request is sent unsigned.
    pub secret: String,
    pub event_type: String,
    pub email_id: Uuid,
    pub data: serde_json::Value,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

/// A transactional email handed to the external sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSendPayload {
    pub org_id: Uuid,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
}
