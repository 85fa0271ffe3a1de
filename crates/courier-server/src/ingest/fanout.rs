//! Turn an applied notification into webhook delivery jobs.

use tracing::{debug, warn};

use courier_shared::crypto::{decrypt_secret, SymmetricKey};
use courier_shared::jobs::{JobKind, WebhookDeliverPayload};
use courier_store::{MessageRef, Webhook};

use super::handlers::Effect;
use crate::queue::{enqueue_typed, EnqueueOptions, JobQueue};
use crate::store::Store;

/// Enqueue one delivery per active webhook subscribed to the effect's event.
/// Returns how many jobs were enqueued.  Failures are logged per webhook.
pub async fn fan_out(
    store: &Store,
    queue: &dyn JobQueue,
    key: &SymmetricKey,
    max_retries: u32,
    msg: &MessageRef,
    effect: &Effect,
) -> usize {
    let event = effect.event.as_str();
    let webhooks = match store
        .with(|db| db.list_subscribed_webhooks(msg.org_id, event))
        .await
    {
        Ok(webhooks) => webhooks,
        Err(e) => {
            warn!(org_id = %msg.org_id, event, error = %e, "Failed to load webhooks");
            return 0;
        }
    };

    let mut enqueued = 0;
    for webhook in webhooks {
        let Some(secret) = open_secret(key, &webhook) else {
            continue;
        };
        let payload = WebhookDeliverPayload {
            webhook_id: webhook.id,
            org_id: msg.org_id,
            url: webhook.url.clone(),
            secret,
            event_type: event.to_string(),
            email_id: msg.id,
            data: effect.data.clone(),
            retry_count: 0,
            max_retries,
        };
        let opts = EnqueueOptions::default().max_attempts(max_retries + 1);
        match enqueue_typed(queue, JobKind::WebhookDeliver, &payload, opts).await {
            Ok(job_id) => {
                debug!(%job_id, webhook_id = %webhook.id, event, "Webhook delivery enqueued");
                enqueued += 1;
            }
            Err(e) => warn!(webhook_id = %webhook.id, error = %e, "Failed to enqueue webhook delivery"),
        }
    }
    enqueued
}

fn open_secret(key: &SymmetricKey, webhook: &Webhook) -> Option<String> {
    if webhook.secret.is_empty() {
        return Some(String::new());
    }
    match decrypt_secret(key, &webhook.secret) {
        Ok(secret) => Some(secret),
        Err(e) => {
            warn!(webhook_id = %webhook.id, error = %e, "Skipping webhook with unreadable secret");
            None
        }
    }
}
