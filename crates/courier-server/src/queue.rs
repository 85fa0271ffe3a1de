//! Job queue contract and its SQLite implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use courier_shared::jobs::{JobKind, QueueName};
use courier_store::{FailDisposition, Job};

use crate::error::QueueError;
use crate::store::Store;

/// Attempts allowed when the caller does not say otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Overrides the kind's default queue.
    pub queue: Option<QueueName>,
    pub max_attempts: Option<u32>,
    /// Earliest run time; `None` means now.
    pub run_at: Option<DateTime<Utc>>,
}

impl EnqueueOptions {
    pub fn queue(mut self, queue: QueueName) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Durable job queue with visibility timeouts and retry backoff.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Uuid, QueueError>;

    /// Claim the oldest due job among `kinds`, hiding it for `visibility`.
    async fn dequeue(&self, kinds: &[JobKind], visibility: Duration) -> Result<Option<Job>, QueueError>;

    /// Keep a claimed job hidden for another `visibility` from now.
    async fn extend_lease(&self, id: Uuid, visibility: Duration) -> Result<bool, QueueError>;

    async fn complete(&self, id: Uuid) -> Result<(), QueueError>;

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailDisposition, QueueError>;
}

/// Serialize a typed payload and enqueue it.
pub async fn enqueue_typed<T: Serialize + Sync>(
    queue: &dyn JobQueue,
    kind: JobKind,
    payload: &T,
    opts: EnqueueOptions,
) -> Result<Uuid, QueueError> {
    let value = serde_json::to_value(payload)?;
    queue.enqueue(kind, value, opts).await
}

/// [`JobQueue`] backed by the `jobs` table.
#[derive(Clone)]
pub struct SqliteQueue {
    store: Store,
}

impl SqliteQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        let queue = opts.queue.unwrap_or_else(|| kind.default_queue());
        let max_attempts = opts.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let run_at = opts.run_at.unwrap_or_else(Utc::now);

        let id = self
            .store
            .with(|db| db.enqueue_job(kind.as_str(), queue.as_str(), &payload, max_attempts, run_at))
            .await?;
        debug!(job_id = %id, kind = %kind, queue = queue.as_str(), "Enqueued job");
        Ok(id)
    }

    async fn dequeue(&self, kinds: &[JobKind], visibility: Duration) -> Result<Option<Job>, QueueError> {
        let names: Vec<&str> = kinds.iter().map(JobKind::as_str).collect();
        let visibility = chrono::Duration::from_std(visibility)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Ok(self
            .store
            .with(|db| db.claim_job(&names, visibility, Utc::now()))
            .await?)
    }

    async fn extend_lease(&self, id: Uuid, visibility: Duration) -> Result<bool, QueueError> {
        let visibility = chrono::Duration::from_std(visibility)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Ok(self
            .store
            .with(|db| db.extend_job_lease(id, visibility, Utc::now()))
            .await?)
    }

    async fn complete(&self, id: Uuid) -> Result<(), QueueError> {
        self.store.with(|db| db.complete_job(id)).await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailDisposition, QueueError> {
        Ok(self.store.with(|db| db.fail_job(id, error, Utc::now())).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::memory_store;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_dequeue_complete() {
        let queue = SqliteQueue::new(memory_store());
        let id = queue
            .enqueue(JobKind::BounceCheck, json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        // Kinds the caller does not handle are never claimed.
        assert!(queue
            .dequeue(&[JobKind::WebhookDeliver], Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        let job = queue
            .dequeue(&[JobKind::BounceCheck], Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.queue, "scheduled");
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);

        // Hidden while claimed.
        assert!(queue
            .dequeue(&[JobKind::BounceCheck], Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        queue.complete(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_until_dead() {
        let store = memory_store();
        let queue = SqliteQueue::new(store.clone());
        let id = queue
            .enqueue(
                JobKind::WebhookDeliver,
                json!({}),
                EnqueueOptions::default().max_attempts(2),
            )
            .await
            .unwrap();

        let first = queue.fail(id, "boom").await.unwrap();
        assert!(matches!(first, FailDisposition::Retrying { attempts: 1, .. }));

        let second = queue.fail(id, "boom").await.unwrap();
        assert_eq!(second, FailDisposition::Dead { attempts: 2 });
        assert_eq!(store.with(|db| db.count_dead_jobs()).await.unwrap(), 1);
    }
}
