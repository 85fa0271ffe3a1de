//! Fixed-size worker pool draining the job queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_shared::jobs::{JobKind, WebhookDeliverPayload};
use courier_store::{FailDisposition, Job};

use crate::dispatcher::Dispatcher;
use crate::error::TaskError;
use crate::monitor::Monitor;
use crate::queue::JobQueue;

/// Executes claimed jobs.  Only kinds listed by [`JobHandler::kinds`] are
/// ever dequeued for it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kinds(&self) -> Vec<JobKind>;

    async fn handle(&self, job: &Job) -> Result<(), TaskError>;
}

/// Routes webhook deliveries to the dispatcher and scheduled tasks to the
/// monitor.  `email:send` belongs to the external sender and is not handled.
pub struct JobRouter {
    dispatcher: Dispatcher,
    monitor: Arc<Monitor>,
}

impl JobRouter {
    pub fn new(dispatcher: Dispatcher, monitor: Arc<Monitor>) -> Self {
        Self { dispatcher, monitor }
    }
}

#[async_trait]
impl JobHandler for JobRouter {
    fn kinds(&self) -> Vec<JobKind> {
        vec![
            JobKind::WebhookDeliver,
            JobKind::BlacklistCheck,
            JobKind::WarmupAdvance,
            JobKind::BounceCheck,
            JobKind::AlertDigest,
        ]
    }

    async fn handle(&self, job: &Job) -> Result<(), TaskError> {
        match JobKind::parse(&job.kind) {
            Some(JobKind::WebhookDeliver) => {
                let mut payload: WebhookDeliverPayload = serde_json::from_value(job.payload.clone())?;
                payload.retry_count = job.attempts;
                self.dispatcher.deliver(&payload).await?;
            }
            Some(JobKind::BlacklistCheck) => {
                self.monitor.run_blacklist_check().await?;
            }
            Some(JobKind::WarmupAdvance) => {
                self.monitor.run_warmup_advance().await?;
            }
            Some(JobKind::BounceCheck) => {
                self.monitor.run_bounce_check().await?;
            }
            Some(JobKind::AlertDigest) => {
                self.monitor.run_alert_digest().await?;
            }
            Some(JobKind::EmailSend) | None => {
                return Err(TaskError::UnhandledKind(job.kind.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub visibility: Duration,
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    settings: PoolSettings,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        settings: PoolSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            handler,
            settings,
            shutdown,
        }
    }

    /// Spawn the workers.  Each exits once the shutdown token fires.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        info!(workers = self.settings.worker_count, "Starting worker pool");
        (0..self.settings.worker_count.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&self.queue),
                    handler: Arc::clone(&self.handler),
                    kinds: self.handler.kinds(),
                    settings: self.settings.clone(),
                    shutdown: self.shutdown.clone(),
                };
                tokio::spawn(async move { worker.run().await })
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    kinds: Vec<JobKind>,
    settings: PoolSettings,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(&self) {
        debug!(worker_id = self.id, "Worker starting");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.queue.dequeue(&self.kinds, self.settings.visibility).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "Failed to dequeue job");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }

        debug!(worker_id = self.id, "Worker stopped");
    }

    async fn process(&self, job: Job) {
        debug!(worker_id = self.id, job_id = %job.id, kind = %job.kind, attempts = job.attempts, "Processing job");

        match self.handle_with_lease(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job.id).await {
                    warn!(job_id = %job.id, error = %e, "Failed to complete job");
                }
            }
            Err(e) => match self.queue.fail(job.id, &e.to_string()).await {
                Ok(FailDisposition::Retrying { attempts, run_at }) => {
                    warn!(job_id = %job.id, kind = %job.kind, attempts, %run_at, error = %e, "Job failed, retry scheduled");
                }
                Ok(FailDisposition::Dead { attempts }) => {
                    error!(job_id = %job.id, kind = %job.kind, attempts, error = %e, "Job failed permanently");
                }
                Err(fail_err) => {
                    error!(job_id = %job.id, error = %fail_err, "Failed to record job failure");
                }
            },
        }
    }

    /// Run the handler, renewing the job's lease until it returns.
    async fn handle_with_lease(&self, job: &Job) -> Result<(), TaskError> {
        let handle = self.handler.handle(job);
        tokio::pin!(handle);

        let mut renew = tokio::time::interval(lease_renewal_period(self.settings.visibility));
        renew.tick().await;

        loop {
            tokio::select! {
                result = &mut handle => return result,
                _ = renew.tick() => {
                    match self.queue.extend_lease(job.id, self.settings.visibility).await {
                        Ok(true) => debug!(job_id = %job.id, "Job lease renewed"),
                        Ok(false) => warn!(job_id = %job.id, "Job vanished while running"),
                        Err(e) => warn!(job_id = %job.id, error = %e, "Failed to renew job lease"),
                    }
                }
            }
        }
    }
}

/// Three renewals per lease, never faster than every 50ms.
fn lease_renewal_period(visibility: Duration) -> Duration {
    (visibility / 3).max(Duration::from_millis(50))
}
