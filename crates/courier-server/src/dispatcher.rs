//! Outbound webhook delivery.
//!
//! One call to [`Dispatcher::deliver`] is one attempt: the payload is signed,
//! POSTed, and the attempt recorded in `webhook_calls`.  Retries are the
//! queue's job; the dispatcher only decides whether another attempt is owed.

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_shared::constants::{
    HEADER_WEBHOOK_SIGNATURE, HEADER_WEBHOOK_TIMESTAMP, WEBHOOK_RESPONSE_BODY_LIMIT,
};
use courier_shared::jobs::WebhookDeliverPayload;
use courier_shared::signature::compute_signature;
use courier_shared::types::CallOutcome;
use courier_store::NewWebhookCall;

use crate::error::DispatchError;
use crate::store::Store;

/// Result of one delivery attempt that needs no further retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub webhook_id: Uuid,
    pub outcome: CallOutcome,
    pub response_status: Option<u16>,
    pub response_time_ms: i64,
    /// The attempt failed but the retry ceiling was reached.
    pub gave_up: bool,
}

/// JSON body POSTed to subscribers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundBody<'a> {
    event: &'a str,
    email_id: Uuid,
    org_id: Uuid,
    timestamp: String,
    data: &'a serde_json::Value,
}

struct Attempt {
    outcome: CallOutcome,
    response_status: Option<u16>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    store: Store,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, store: Store, shutdown: CancellationToken) -> Self {
        Self {
            client,
            store,
            shutdown,
        }
    }

    /// Make one delivery attempt.
    ///
    /// Returns `Ok` on success or once `retry_count >= max_retries`;
    /// otherwise [`DispatchError::Retryable`] so the queue reschedules.
    pub async fn deliver(&self, event: &WebhookDeliverPayload) -> Result<DeliveryReport, DispatchError> {
        let now = Utc::now();
        let body = serde_json::to_vec(&OutboundBody {
            event: &event.event_type,
            email_id: event.email_id,
            org_id: event.org_id,
            timestamp: now.to_rfc3339(),
            data: &event.data,
        })
        .map_err(|e| DispatchError::Request(e.to_string()))?;

        let mut request = self
            .client
            .post(&event.url)
            .header(CONTENT_TYPE, "application/json");

        if !event.secret.is_empty() {
            let timestamp = now.timestamp();
            let signature = compute_signature(&event.secret, timestamp, &body)
                .map_err(|e| DispatchError::Request(e.to_string()))?;
            request = request
                .header(HEADER_WEBHOOK_TIMESTAMP, timestamp.to_string())
                .header(HEADER_WEBHOOK_SIGNATURE, signature);
        }

        let started = Instant::now();
        let attempt = tokio::select! {
            result = request.body(body).send() => match result {
                Ok(response) => classify(response).await,
                Err(e) => Attempt {
                    outcome: CallOutcome::Error,
                    response_status: None,
                    error: Some(e.to_string()),
                },
            },
            _ = self.shutdown.cancelled() => Attempt {
                outcome: CallOutcome::Error,
                response_status: None,
                error: Some("delivery cancelled by shutdown".to_string()),
            },
        };
        let response_time_ms = elapsed_ms(started.elapsed());

        let call = NewWebhookCall {
            webhook_id: event.webhook_id,
            event_type: event.event_type.clone(),
            payload: serde_json::json!({ "emailId": event.email_id }),
            response_status: attempt.response_status,
            response_time_ms,
            status: attempt.outcome,
            attempts: event.retry_count + 1,
            error: attempt.error.clone(),
        };
        if let Err(e) = self.store.with(|db| db.insert_webhook_call(&call)).await {
            warn!(webhook_id = %event.webhook_id, error = %e, "Failed to record webhook call");
        }

        let mut report = DeliveryReport {
            webhook_id: event.webhook_id,
            outcome: attempt.outcome,
            response_status: attempt.response_status,
            response_time_ms,
            gave_up: false,
        };

        if attempt.outcome == CallOutcome::Success {
            debug!(
                webhook_id = %event.webhook_id,
                status = ?attempt.response_status,
                response_time_ms,
                "Webhook delivered"
            );
            return Ok(report);
        }

        let reason = attempt.error.unwrap_or_default();
        if event.retry_count >= event.max_retries {
            info!(
                webhook_id = %event.webhook_id,
                event = %event.event_type,
                attempts = event.retry_count + 1,
                error = %reason,
                "Webhook delivery failed, giving up"
            );
            report.gave_up = true;
            return Ok(report);
        }

        Err(DispatchError::Retryable {
            webhook_id: event.webhook_id,
            attempt: event.retry_count + 1,
            reason,
        })
    }
}

async fn classify(response: reqwest::Response) -> Attempt {
    let status = response.status();
    if status.is_success() {
        return Attempt {
            outcome: CallOutcome::Success,
            response_status: Some(status.as_u16()),
            error: None,
        };
    }

    let body = read_truncated(response, WEBHOOK_RESPONSE_BODY_LIMIT).await;
    Attempt {
        outcome: CallOutcome::Failed,
        response_status: Some(status.as_u16()),
        error: Some(format!("HTTP {}: {}", status.as_u16(), body)),
    }
}

/// Read at most `limit` bytes of the body, lossily decoded.
async fn read_truncated(mut response: reqwest::Response, limit: usize) -> String {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(limit);
    String::from_utf8_lossy(&buf).into_owned()
}

fn elapsed_ms(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::memory_store;
    use courier_net::build_webhook_client;
    use courier_shared::signature::verify_webhook_signature;
    use courier_store::Webhook;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(store: &Store, url: String, secret: &str, max_retries: u32) -> WebhookDeliverPayload {
        let webhook = Webhook {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "ops".into(),
            url: url.clone(),
            secret: String::new(),
            events: vec!["email.bounced".into()],
            active: true,
            created_at: Utc::now(),
        };
        store.with(|db| db.insert_webhook(&webhook)).await.unwrap();

        WebhookDeliverPayload {
            webhook_id: webhook.id,
            org_id: webhook.org_id,
            url,
            secret: secret.to_string(),
            event_type: "email.bounced".into(),
            email_id: Uuid::new_v4(),
            data: json!({ "bounceType": "Permanent" }),
            retry_count: 0,
            max_retries,
        }
    }

    fn dispatcher(store: Store) -> Dispatcher {
        let client = build_webhook_client(Duration::from_secs(5)).unwrap();
        Dispatcher::new(client, store, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_signed_delivery_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("user-agent", "Courier-Webhook/1.0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = memory_store();
        let event = setup(&store, format!("{}/hook", server.uri()), "whsec_abc", 5).await;
        let report = dispatcher(store.clone()).deliver(&event).await.unwrap();
        assert_eq!(report.outcome, CallOutcome::Success);
        assert_eq!(report.response_status, Some(200));
        assert!(!report.gave_up);

        let requests = server.received_requests().await.unwrap();
        let req = &requests[0];
        let ts = req.headers.get(HEADER_WEBHOOK_TIMESTAMP).unwrap().to_str().unwrap();
        let sig = req.headers.get(HEADER_WEBHOOK_SIGNATURE).unwrap().to_str().unwrap();
        verify_webhook_signature("whsec_abc", ts, sig, &req.body, 300, Utc::now()).unwrap();

        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["event"], "email.bounced");
        assert_eq!(body["emailId"], event.email_id.to_string());
        assert_eq!(body["orgId"], event.org_id.to_string());
        assert_eq!(body["data"]["bounceType"], "Permanent");

        let calls = store
            .with(|db| db.list_webhook_calls(event.webhook_id, 10))
            .await
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, CallOutcome::Success);
        assert_eq!(calls[0].attempts, 1);
        assert_eq!(calls[0].payload, json!({ "emailId": event.email_id }));
    }

    #[tokio::test]
    async fn test_empty_secret_sends_unsigned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = memory_store();
        let event = setup(&store, server.uri(), "", 5).await;
        dispatcher(store).deliver(&event).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get(HEADER_WEBHOOK_SIGNATURE).is_none());
        assert!(requests[0].headers.get(HEADER_WEBHOOK_TIMESTAMP).is_none());
    }

    #[tokio::test]
    async fn test_server_error_retried_until_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let store = memory_store();
        let mut event = setup(&store, server.uri(), "whsec_abc", 2).await;
        let dispatcher = dispatcher(store.clone());

        for retry in 0..2 {
            event.retry_count = retry;
            let err = dispatcher.deliver(&event).await.unwrap_err();
            assert!(matches!(err, DispatchError::Retryable { attempt, .. } if attempt == retry + 1));
        }

        event.retry_count = 2;
        let report = dispatcher.deliver(&event).await.unwrap();
        assert!(report.gave_up);
        assert_eq!(report.outcome, CallOutcome::Failed);
        assert_eq!(report.response_status, Some(500));

        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        let calls = store
            .with(|db| db.list_webhook_calls(event.webhook_id, 10))
            .await
            .unwrap();
        assert_eq!(calls.len(), 3);
        let error = calls[0].error.as_deref().unwrap();
        assert!(error.starts_with("HTTP 500: "));
        assert_eq!(error.len(), "HTTP 500: ".len() + WEBHOOK_RESPONSE_BODY_LIMIT);
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/elsewhere"))
            .mount(&server)
            .await;

        let store = memory_store();
        let event = setup(&store, format!("{}/moved", server.uri()), "", 0).await;
        let report = dispatcher(store).deliver(&event).await.unwrap();
        assert_eq!(report.outcome, CallOutcome::Failed);
        assert_eq!(report.response_status, Some(301));
        assert!(report.gave_up);
    }

    #[tokio::test]
    async fn test_transport_error_is_classified_as_error() {
        let store = memory_store();
        // Nothing listens on port 9 of the loopback interface.
        let event = setup(&store, "http://127.0.0.1:9/hook".into(), "", 3).await;
        let err = dispatcher(store.clone()).deliver(&event).await.unwrap_err();
        assert!(matches!(err, DispatchError::Retryable { .. }));

        let calls = store
            .with(|db| db.list_webhook_calls(event.webhook_id, 10))
            .await
            .unwrap();
        assert_eq!(calls[0].status, CallOutcome::Error);
        assert_eq!(calls[0].response_status, None);
    }
}
