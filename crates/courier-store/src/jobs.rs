//! Durable job table.
//!
//! A claimed job stays in the table with `locked_until` set; it is deleted on
//! completion, rescheduled with backoff on failure, or marked `dead` once its
//! attempts reach `max_attempts`.  A claim whose visibility window lapses
//! becomes claimable again.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use uuid::Uuid;

use crate::codec::{json_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{FailDisposition, Job};

/// Delay before the next attempt, indexed by the number of failures so far.
const BACKOFF_SECS: [i64; 9] = [1, 2, 4, 8, 16, 32, 60, 120, 300];

/// Upper bound on the retry delay.
const MAX_BACKOFF_SECS: i64 = 600;

/// Delay after the `failures`-th failed attempt (1-based).
pub fn retry_backoff(failures: u32) -> Duration {
    let idx = failures.saturating_sub(1) as usize;
    Duration::seconds(BACKOFF_SECS.get(idx).copied().unwrap_or(MAX_BACKOFF_SECS))
}

impl Database {
    pub fn enqueue_job(
        &self,
        kind: &str,
        queue: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO jobs (id, kind, queue, payload, attempts, max_attempts, run_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, 'pending', ?7)",
            params![
                id.to_string(),
                kind,
                queue,
                serde_json::to_string(payload)?,
                max_attempts.max(1),
                ts(&run_at),
                ts(&Utc::now()),
            ],
        )?;
        Ok(id)
    }

    /// Claim the oldest due job whose kind is in `kinds`, hiding it from other
    /// claimers until `now + visibility`.
    pub fn claim_job(
        &self,
        kinds: &[&str],
        visibility: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        if kinds.is_empty() {
            return Ok(None);
        }

        let placeholders = (0..kinds.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, kind, queue, payload, attempts, max_attempts, run_at
             FROM jobs
             WHERE status = 'pending'
               AND run_at <= ?1
               AND (locked_until IS NULL OR locked_until <= ?1)
               AND kind IN ({placeholders})
             ORDER BY run_at, created_at
             LIMIT 1"
        );

        let now_str = ts(&now);
        let mut bind: Vec<String> = Vec::with_capacity(kinds.len() + 1);
        bind.push(now_str.clone());
        bind.extend(kinds.iter().map(|k| k.to_string()));

        let job = self
            .conn()
            .query_row(&sql, params_from_iter(bind.iter()), row_to_job)
            .optional()?;

        let Some(job) = job else {
            return Ok(None);
        };

        let claimed = self.conn().execute(
            "UPDATE jobs SET locked_until = ?2
             WHERE id = ?1 AND (locked_until IS NULL OR locked_until <= ?3)",
            params![job.id.to_string(), ts(&(now + visibility)), now_str],
        )?;

        Ok(if claimed == 1 { Some(job) } else { None })
    }

    /// Push a claimed job's lock forward to `now + visibility`.  Returns
    /// `false` once the job is gone or dead.
    pub fn extend_job_lease(&self, id: Uuid, visibility: Duration, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE jobs SET locked_until = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), ts(&(now + visibility))],
        )?;
        Ok(affected > 0)
    }

    pub fn complete_job(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Record a failed attempt and either reschedule with backoff or mark the
    /// job dead.
    pub fn fail_job(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<FailDisposition> {
        let (attempts, max_attempts): (u32, u32) = self
            .conn()
            .query_row(
                "SELECT attempts, max_attempts FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(not_found)?;

        let attempts = attempts + 1;
        if attempts >= max_attempts {
            self.conn().execute(
                "UPDATE jobs SET attempts = ?2, status = 'dead', locked_until = NULL, last_error = ?3
                 WHERE id = ?1",
                params![id.to_string(), attempts, error],
            )?;
            return Ok(FailDisposition::Dead { attempts });
        }

        let run_at = now + retry_backoff(attempts);
        self.conn().execute(
            "UPDATE jobs SET attempts = ?2, run_at = ?3, locked_until = NULL, last_error = ?4
             WHERE id = ?1",
            params![id.to_string(), attempts, ts(&run_at), error],
        )?;
        Ok(FailDisposition::Retrying { attempts, run_at })
    }

    /// Pending (not dead) jobs of one kind, oldest first.
    pub fn list_pending_jobs(&self, kind: &str) -> Result<Vec<Job>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, kind, queue, payload, attempts, max_attempts, run_at
             FROM jobs WHERE kind = ?1 AND status = 'pending'
             ORDER BY run_at, created_at",
        )?;
        let rows = stmt.query_map(params![kind], row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    pub fn count_dead_jobs(&self) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = 'dead'",
            [],
            |row| row.get(0),
        )?)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_at(row, 0)?,
        kind: row.get(1)?,
        queue: row.get(2)?,
        payload: json_at(row, 3)?,
        attempts: row.get(4)?,
        max_attempts: row.get(5)?,
        run_at: ts_at(row, 6)?,
    })
}
