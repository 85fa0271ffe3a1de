//! Periodic task registry and the loop that enqueues due tasks.
//!
//! The scheduler never runs task logic itself.  At each fire time it enqueues
//! a parameterless job on the `scheduled` queue; the worker pool picks it up.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_shared::jobs::{JobKind, QueueName};

use crate::queue::{EnqueueOptions, JobQueue};

/// A periodic task: a job kind and a standard 5-field cron expression (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: &'static str,
    pub kind: JobKind,
    pub schedule: &'static str,
}

pub const TASKS: [ScheduledTask; 4] = [
    ScheduledTask {
        name: "blacklist-check",
        kind: JobKind::BlacklistCheck,
        schedule: "0 */6 * * *",
    },
    ScheduledTask {
        name: "warmup-advance",
        kind: JobKind::WarmupAdvance,
        schedule: "0 0 * * *",
    },
    ScheduledTask {
        name: "bounce-check",
        kind: JobKind::BounceCheck,
        schedule: "0 * * * *",
    },
    ScheduledTask {
        name: "alert-digest",
        kind: JobKind::AlertDigest,
        schedule: "0 9 * * *",
    },
];

/// Parse a 5-field expression; the `cron` crate expects a leading seconds field.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&format!("0 {}", expr.trim()))
}

struct Registered {
    task: ScheduledTask,
    schedule: Schedule,
}

pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    tasks: Vec<Registered>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, shutdown: CancellationToken) -> Self {
        Self::with_tasks(queue, &TASKS, shutdown)
    }

    /// Register each task independently; one that fails to parse is skipped.
    pub fn with_tasks(
        queue: Arc<dyn JobQueue>,
        tasks: &[ScheduledTask],
        shutdown: CancellationToken,
    ) -> Self {
        let mut registered = Vec::with_capacity(tasks.len());
        for task in tasks {
            match parse_schedule(task.schedule) {
                Ok(schedule) => {
                    info!(task = task.name, schedule = task.schedule, "Registered scheduled task");
                    registered.push(Registered {
                        task: *task,
                        schedule,
                    });
                }
                Err(e) => {
                    error!(task = task.name, schedule = task.schedule, error = %e, "Failed to register scheduled task");
                }
            }
        }

        Self {
            queue,
            tasks: registered,
            shutdown,
        }
    }

    pub fn registered(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|r| r.task.name).collect()
    }

    /// Earliest fire time strictly after `after`, with every task due then.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<JobKind>)> {
        let upcoming: Vec<(DateTime<Utc>, JobKind)> = self
            .tasks
            .iter()
            .filter_map(|r| r.schedule.after(&after).next().map(|at| (at, r.task.kind)))
            .collect();

        let earliest = upcoming.iter().map(|(at, _)| *at).min()?;
        let due = upcoming
            .into_iter()
            .filter(|(at, _)| *at == earliest)
            .map(|(_, kind)| kind)
            .collect();
        Some((earliest, due))
    }

    /// Enqueue one parameterless job per kind on the `scheduled` queue.
    /// Failures are logged; the loop keeps going.
    pub async fn enqueue_due(&self, kinds: &[JobKind]) -> usize {
        let mut enqueued = 0;
        for kind in kinds {
            let opts = EnqueueOptions::default().queue(QueueName::Scheduled);
            match self.queue.enqueue(*kind, serde_json::json!({}), opts).await {
                Ok(job_id) => {
                    debug!(kind = %kind, job_id = %job_id, "Enqueued scheduled task");
                    enqueued += 1;
                }
                Err(e) => error!(kind = %kind, error = %e, "Failed to enqueue scheduled task"),
            }
        }
        enqueued
    }

    /// Sleep until the next fire time, enqueue, repeat.  Returns on shutdown.
    pub async fn run(&self) {
        info!(tasks = self.tasks.len(), "Scheduler started");

        let mut last_fired: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let Some((at, kinds)) = self.next_fire(resume_from(now, last_fired)) else {
                warn!("No scheduled tasks registered, scheduler idle");
                self.shutdown.cancelled().await;
                break;
            };

            let wait = (at - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.cancelled() => break,
            }

            self.enqueue_due(&kinds).await;
            last_fired = Some(at);
        }

        info!("Scheduler stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Where to look for the next tick.  A timer can wake a hair before the
/// wall clock reaches the tick it slept for; never look before that tick.
fn resume_from(now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> DateTime<Utc> {
    last_fired.map_or(now, |last| last.max(now))
}
