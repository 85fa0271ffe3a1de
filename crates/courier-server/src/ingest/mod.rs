//! Provider notification gateway.
//!
//! Every valid envelope is acknowledged; what actually happened to it is
//! reported separately as a [`ProcessingOutcome`] so that the HTTP layer can
//! keep answering 200 while processing problems stay visible in logs and
//! [`IngestStats`].

pub mod envelope;
mod fanout;
mod handlers;
pub mod provider;
pub mod verify;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use courier_shared::crypto::SymmetricKey;

use crate::error::IngestError;
use crate::queue::JobQueue;
use crate::store::Store;
use envelope::{Envelope, EnvelopeType, MailNotification, NotificationKind};
use provider::{validate_provider_url, ProviderHttp};
use verify::SignatureVerifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The notification changed state (and fan-out ran).
    Applied,
    /// No message carries the provider message id.
    UnknownMessage,
    /// Understood but nothing to do.
    Ignored,
    /// Subscription confirmed with the provider.
    Confirmed,
    Failed(String),
}

/// What the provider is told: the request was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAck {
    pub outcome: ProcessingOutcome,
}

/// In-process outcome counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    applied: AtomicU64,
    unknown_message: AtomicU64,
    ignored: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSnapshot {
    pub received: u64,
    pub applied: u64,
    pub unknown_message: u64,
    pub ignored: u64,
    pub confirmed: u64,
    pub failed: u64,
}

impl IngestStats {
    fn record(&self, outcome: &ProcessingOutcome) {
        let counter = match outcome {
            ProcessingOutcome::Applied => &self.applied,
            ProcessingOutcome::UnknownMessage => &self.unknown_message,
            ProcessingOutcome::Ignored => &self.ignored,
            ProcessingOutcome::Confirmed => &self.confirmed,
            ProcessingOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            unknown_message: self.unknown_message.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Gateway {
    store: Store,
    queue: Arc<dyn JobQueue>,
    http: Arc<dyn ProviderHttp>,
    secret_key: SymmetricKey,
    webhook_max_retries: u32,
    verifier: Option<SignatureVerifier>,
    stats: Arc<IngestStats>,
}

impl Gateway {
    pub fn new(
        store: Store,
        queue: Arc<dyn JobQueue>,
        http: Arc<dyn ProviderHttp>,
        secret_key: SymmetricKey,
        webhook_max_retries: u32,
    ) -> Self {
        Self {
            store,
            queue,
            http,
            secret_key,
            webhook_max_retries,
            verifier: None,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Require a valid provider signature on every envelope.
    pub fn with_signature_verification(mut self) -> Self {
        self.verifier = Some(SignatureVerifier::new(self.http.clone()));
        self
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Handle one raw request body.  `Err` is reserved for envelopes the
    /// provider must be told are invalid.
    pub async fn ingest(&self, body: &[u8]) -> Result<TransportAck, IngestError> {
        let env = Envelope::parse(body)?;
        validate_provider_url(&env.signing_cert_url).map_err(IngestError::InvalidSigningCert)?;
        let kind = env.envelope_type()?;

        if let Some(verifier) = &self.verifier {
            if let Err(e) = verifier.verify(&env).await {
                warn!(message_id = %env.message_id, error = %e, "Rejected envelope signature");
                return Err(e);
            }
        }

        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let outcome = match kind {
            EnvelopeType::SubscriptionConfirmation => self.confirm_subscription(&env).await,
            EnvelopeType::UnsubscribeConfirmation => {
                info!(topic_arn = %env.topic_arn, "Received unsubscribe confirmation");
                ProcessingOutcome::Ignored
            }
            EnvelopeType::Notification => self.process_notification(&env).await,
        };

        match &outcome {
            ProcessingOutcome::Failed(reason) => {
                warn!(message_id = %env.message_id, reason = %reason, "Notification processing failed")
            }
            other => debug!(message_id = %env.message_id, outcome = ?other, "Envelope processed"),
        }
        self.stats.record(&outcome);
        Ok(TransportAck { outcome })
    }

    async fn confirm_subscription(&self, env: &Envelope) -> ProcessingOutcome {
        let Some(raw) = env.subscribe_url.as_deref() else {
            return ProcessingOutcome::Failed("subscription confirmation without SubscribeURL".into());
        };
        if let Err(e) = validate_provider_url(raw) {
            return ProcessingOutcome::Failed(format!("invalid SubscribeURL {e}"));
        }

        match self.http.get(raw).await {
            Ok(reply) if (200..300).contains(&reply.status) => {
                info!(topic_arn = %env.topic_arn, "Subscription confirmed");
                ProcessingOutcome::Confirmed
            }
            Ok(reply) => ProcessingOutcome::Failed(format!(
                "subscription confirmation returned HTTP {}",
                reply.status
            )),
            Err(e) => ProcessingOutcome::Failed(format!("subscription confirmation failed: {e}")),
        }
    }

    async fn process_notification(&self, env: &Envelope) -> ProcessingOutcome {
        let notification: MailNotification = match serde_json::from_str(&env.message) {
            Ok(n) => n,
            Err(e) => return ProcessingOutcome::Failed(format!("invalid notification message: {e}")),
        };
        let Some(kind) = NotificationKind::parse(&notification.notification_type) else {
            debug!(notification_type = %notification.notification_type, "Unhandled notification type");
            return ProcessingOutcome::Ignored;
        };

        let provider_id = notification.mail.message_id.as_str();
        let msg = match self
            .store
            .with(|db| db.find_message_by_provider_id(provider_id))
            .await
        {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!(provider_message_id = provider_id, "No message for notification");
                return ProcessingOutcome::UnknownMessage;
            }
            Err(e) => return ProcessingOutcome::Failed(format!("message lookup failed: {e}")),
        };

        let now = Utc::now();
        let effect = match self
            .store
            .with(|db| handlers::apply(db, &msg, &notification, kind, now))
            .await
        {
            Ok(Some(effect)) => effect,
            Ok(None) => {
                debug!(message_id = %msg.id, ?kind, "Notification section missing");
                return ProcessingOutcome::Ignored;
            }
            Err(e) => return ProcessingOutcome::Failed(format!("{kind:?} handler failed: {e}")),
        };

        let enqueued = fanout::fan_out(
            &self.store,
            self.queue.as_ref(),
            &self.secret_key,
            self.webhook_max_retries,
            &msg,
            &effect,
        )
        .await;
        info!(
            message_id = %msg.id,
            org_id = %msg.org_id,
            event = effect.event.as_str(),
            webhooks = enqueued,
            "Notification applied"
        );
        ProcessingOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::tests::FakeProvider;
    use crate::ingest::provider::HttpReply;
    use crate::queue::SqliteQueue;
    use crate::store::tests::memory_store;
    use courier_shared::crypto::{derive_secret_key, encrypt_secret};
    use courier_shared::jobs::WebhookDeliverPayload;
    use courier_shared::types::MessageStatus;
    use courier_store::{MessageTable, NewMessage, Webhook};
    use serde_json::json;
    use uuid::Uuid;

    const CERT_URL: &str = "https://sns.us-east-1.amazonaws.com/SimpleNotificationService.pem";
    const CONFIRM_URL: &str =
        "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription&Token=tok";

    struct Fixture {
        gateway: Gateway,
        store: Store,
        key: SymmetricKey,
        org_id: Uuid,
        message_id: Uuid,
    }

    async fn fixture(provider: FakeProvider) -> Fixture {
        let store = memory_store();
        let queue = Arc::new(SqliteQueue::new(store.clone()));
        let key = derive_secret_key("test passphrase");
        let org_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();
        store
            .with(|db| {
                db.insert_message(
                    MessageTable::Transactional,
                    &NewMessage {
                        id: message_id,
                        org_id,
                        provider_message_id: Some("prov-1".into()),
                        from_address: "news@example.com".into(),
                        to_addresses: vec!["reader@example.org".into()],
                        subject: "Hello".into(),
                        status: MessageStatus::Sent,
                        created_at: Utc::now(),
                    },
                )
            })
            .await
            .unwrap();

        let gateway = Gateway::new(store.clone(), queue, Arc::new(provider), key, 5);
        Fixture {
            gateway,
            store,
            key,
            org_id,
            message_id,
        }
    }

    fn webhook(org_id: Uuid, secret: String, events: &[&str]) -> Webhook {
        Webhook {
            id: Uuid::new_v4(),
            org_id,
            name: "hook".into(),
            url: "https://hooks.example.net/in".into(),
            secret,
            events: events.iter().map(|e| e.to_string()).collect(),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn notification_body(message: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "Type": "Notification",
            "MessageId": "env-1",
            "TopicArn": "arn:aws:sns:us-east-1:123:ses",
            "Message": message.to_string(),
            "Timestamp": "2024-03-01T00:00:00.000Z",
            "SignatureVersion": "1",
            "Signature": "c2ln",
            "SigningCertURL": CERT_URL,
        }))
        .unwrap()
    }

    fn hard_bounce() -> Vec<u8> {
        notification_body(json!({
            "notificationType": "Bounce",
            "mail": {"messageId": "prov-1", "source": "news@example.com"},
            "bounce": {
                "bounceType": "Permanent",
                "bounceSubType": "General",
                "bouncedRecipients": [{"emailAddress": "Reader@Example.org", "diagnosticCode": "550 5.1.1"}]
            }
        }))
    }

    async fn pending_deliveries(store: &Store) -> Vec<WebhookDeliverPayload> {
        store
            .with(|db| db.list_pending_jobs("webhook:deliver"))
            .await
            .unwrap()
            .into_iter()
            .map(|job| serde_json::from_value(job.payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_hard_bounce_twice_is_idempotent() {
        let fx = fixture(FakeProvider::default()).await;
        fx.store
            .with(|db| {
                db.insert_contact(fx.org_id, "reader@example.org", Utc::now())?;
                db.insert_webhook(&webhook(fx.org_id, String::new(), &["email.bounced"]))
            })
            .await
            .unwrap();

        for _ in 0..2 {
            let ack = fx.gateway.ingest(&hard_bounce()).await.unwrap();
            assert_eq!(ack.outcome, ProcessingOutcome::Applied);
        }

        let suppressions = fx
            .store
            .with(|db| db.list_suppressions(fx.org_id))
            .await
            .unwrap();
        assert_eq!(suppressions.len(), 1);
        assert_eq!(suppressions[0].email, "reader@example.org");
        assert_eq!(
            fx.store
                .with(|db| db.contact_status(fx.org_id, "reader@example.org"))
                .await
                .unwrap(),
            "bounced"
        );

        let deliveries = pending_deliveries(&fx.store).await;
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].event_type, "email.bounced");
        assert_eq!(deliveries[0].email_id, fx.message_id);
        assert_eq!(deliveries[0].max_retries, 5);
        assert_eq!(deliveries[0].data["bounceType"], "hard");

        let stats = fx.gateway.stats().snapshot();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.applied, 2);
    }

    #[tokio::test]
    async fn test_two_opens_set_opened_at_once() {
        let fx = fixture(FakeProvider::default()).await;
        let open = |ts: &str| {
            notification_body(json!({
                "notificationType": "Open",
                "mail": {"messageId": "prov-1"},
                "open": {"timestamp": ts, "ipAddress": "198.51.100.7", "userAgent": "Mail"}
            }))
        };

        fx.gateway.ingest(&open("2024-03-01T10:00:00Z")).await.unwrap();
        let first = fx
            .store
            .with(|db| db.get_message(MessageTable::Transactional, fx.message_id))
            .await
            .unwrap()
            .opened_at;
        assert!(first.is_some());

        fx.gateway.ingest(&open("2024-03-01T11:00:00Z")).await.unwrap();
        let message = fx
            .store
            .with(|db| db.get_message(MessageTable::Transactional, fx.message_id))
            .await
            .unwrap();
        assert_eq!(message.opened_at, first);

        let msg_ref = courier_store::MessageRef {
            table: MessageTable::Transactional,
            id: fx.message_id,
            org_id: fx.org_id,
        };
        let events = fx
            .store
            .with(|db| db.list_delivery_events(&msg_ref))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_message_and_type_are_acknowledged() {
        let fx = fixture(FakeProvider::default()).await;
        let unknown = notification_body(json!({
            "notificationType": "Delivery",
            "mail": {"messageId": "nobody"},
            "delivery": {"recipients": ["x@example.org"], "processingTimeMillis": 10}
        }));
        let ack = fx.gateway.ingest(&unknown).await.unwrap();
        assert_eq!(ack.outcome, ProcessingOutcome::UnknownMessage);

        let odd = notification_body(json!({"notificationType": "Subscription", "mail": {}}));
        assert_eq!(fx.gateway.ingest(&odd).await.unwrap().outcome, ProcessingOutcome::Ignored);

        let mut broken = serde_json::from_slice::<serde_json::Value>(&unknown).unwrap();
        broken["Message"] = json!("{not json");
        let ack = fx
            .gateway
            .ingest(&serde_json::to_vec(&broken).unwrap())
            .await
            .unwrap();
        assert!(matches!(ack.outcome, ProcessingOutcome::Failed(_)));

        let stats = fx.gateway.stats().snapshot();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.unknown_message, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_envelope_validation_errors() {
        let fx = fixture(FakeProvider::default()).await;
        assert!(matches!(
            fx.gateway.ingest(b"{nope").await,
            Err(IngestError::MalformedJson(_))
        ));

        let mut env: serde_json::Value =
            serde_json::from_slice(&notification_body(json!({}))).unwrap();
        env["SigningCertURL"] = json!("https://evil.example.com/cert.pem");
        assert!(matches!(
            fx.gateway.ingest(&serde_json::to_vec(&env).unwrap()).await,
            Err(IngestError::InvalidSigningCert(_))
        ));

        env["SigningCertURL"] = json!(CERT_URL);
        env["Type"] = json!("Telegram");
        assert!(matches!(
            fx.gateway.ingest(&serde_json::to_vec(&env).unwrap()).await,
            Err(IngestError::UnknownType(_))
        ));
        assert_eq!(fx.gateway.stats().snapshot().received, 0);
    }

    #[tokio::test]
    async fn test_subscription_confirmation_fetches_subscribe_url() {
        let mut provider = FakeProvider::default();
        provider.replies.insert(
            CONFIRM_URL.to_string(),
            HttpReply {
                status: 200,
                body: b"<ConfirmSubscriptionResponse/>".to_vec(),
            },
        );
        let fx = fixture(provider).await;

        let body = serde_json::to_vec(&json!({
            "Type": "SubscriptionConfirmation",
            "MessageId": "env-2",
            "Token": "tok",
            "TopicArn": "arn:aws:sns:us-east-1:123:ses",
            "Message": "You have chosen to subscribe",
            "SubscribeURL": CONFIRM_URL,
            "Timestamp": "2024-03-01T00:00:00.000Z",
            "SignatureVersion": "1",
            "Signature": "c2ln",
            "SigningCertURL": CERT_URL,
        }))
        .unwrap();
        let ack = fx.gateway.ingest(&body).await.unwrap();
        assert_eq!(ack.outcome, ProcessingOutcome::Confirmed);

        let mut untrusted: serde_json::Value = serde_json::from_slice(&body).unwrap();
        untrusted["SubscribeURL"] = json!("https://attacker.example.com/confirm");
        let ack = fx
            .gateway
            .ingest(&serde_json::to_vec(&untrusted).unwrap())
            .await
            .unwrap();
        assert!(matches!(ack.outcome, ProcessingOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_fan_out_decrypts_secrets_and_skips_unreadable() {
        let fx = fixture(FakeProvider::default()).await;
        let sealed = encrypt_secret(&fx.key, "whsec_plain").unwrap();
        let other_key = derive_secret_key("some other passphrase");
        let foreign = encrypt_secret(&other_key, "whsec_foreign").unwrap();
        fx.store
            .with(|db| {
                db.insert_webhook(&webhook(fx.org_id, sealed, &["email.delivered"]))?;
                db.insert_webhook(&webhook(fx.org_id, foreign, &["email.delivered"]))?;
                db.insert_webhook(&webhook(fx.org_id, String::new(), &["email.opened"]))
            })
            .await
            .unwrap();

        let body = notification_body(json!({
            "notificationType": "Delivery",
            "mail": {"messageId": "prov-1"},
            "delivery": {"recipients": ["reader@example.org"], "processingTimeMillis": 42}
        }));
        assert_eq!(
            fx.gateway.ingest(&body).await.unwrap().outcome,
            ProcessingOutcome::Applied
        );

        let deliveries = pending_deliveries(&fx.store).await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].secret, "whsec_plain");
        assert_eq!(deliveries[0].event_type, "email.delivered");
    }

    #[tokio::test]
    async fn test_reject_fans_out_to_rejected_subscribers() {
        let fx = fixture(FakeProvider::default()).await;
        fx.store
            .with(|db| {
                db.insert_webhook(&webhook(fx.org_id, String::new(), &["email.rejected"]))?;
                db.insert_webhook(&webhook(fx.org_id, String::new(), &["email.delivered"]))
            })
            .await
            .unwrap();

        let body = notification_body(json!({
            "notificationType": "Reject",
            "mail": {"messageId": "prov-1"},
            "reject": {"reason": "Bad content"}
        }));
        assert_eq!(
            fx.gateway.ingest(&body).await.unwrap().outcome,
            ProcessingOutcome::Applied
        );

        let message = fx
            .store
            .with(|db| db.get_message(MessageTable::Transactional, fx.message_id))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Failed);

        let deliveries = pending_deliveries(&fx.store).await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event_type, "email.rejected");
        assert_eq!(deliveries[0].data["reason"], "Bad content");
        assert_eq!(deliveries[0].data["providerMessageId"], "prov-1");
    }

    #[tokio::test]
    async fn test_signature_verification_rejects_unsigned_envelopes() {
        let fx = fixture(FakeProvider::default()).await;
        let gateway = fx.gateway.with_signature_verification();
        assert!(matches!(
            gateway.ingest(&hard_bounce()).await,
            Err(IngestError::SignatureRejected(_))
        ));
        let suppressions = fx
            .store
            .with(|db| db.list_suppressions(fx.org_id))
            .await
            .unwrap();
        assert!(suppressions.is_empty());

        let stats = gateway.stats().snapshot();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.failed, 0);
    }
}
