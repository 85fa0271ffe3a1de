use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::codec::{enum_at, opt_ts_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{WarmingIp, WarmupProgress};

impl Database {
    /// Start (or restart) warming `ip_address` for the org at day 1.
    pub fn start_warmup(
        &self,
        org_id: Uuid,
        ip_address: &str,
        schedule_name: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO warmup_progress
                 (org_id, ip_address, schedule_name, current_day, status, started_at, updated_at)
             VALUES (?1, ?2, ?3, 1, 'active', ?4, ?4)
             ON CONFLICT (org_id, ip_address) DO UPDATE SET
                 schedule_name = excluded.schedule_name,
                 current_day = 1,
                 status = 'active',
                 pause_reason = NULL,
                 started_at = excluded.started_at,
                 completed_at = NULL,
                 updated_at = excluded.updated_at",
            params![org_id.to_string(), ip_address, schedule_name, ts(&at)],
        )?;
        Ok(())
    }

    pub fn get_warmup(&self, org_id: Uuid, ip_address: &str) -> Result<WarmupProgress> {
        self.conn()
            .query_row(
                "SELECT id, org_id, ip_address, schedule_name, current_day, status,
                        pause_reason, started_at, completed_at
                 FROM warmup_progress WHERE org_id = ?1 AND ip_address = ?2",
                params![org_id.to_string(), ip_address],
                |row| {
                    Ok(WarmupProgress {
                        id: row.get(0)?,
                        org_id: uuid_at(row, 1)?,
                        ip_address: row.get(2)?,
                        schedule_name: row.get(3)?,
                        current_day: row.get(4)?,
                        status: enum_at(row, 5)?,
                        pause_reason: row.get(6)?,
                        started_at: ts_at(row, 7)?,
                        completed_at: opt_ts_at(row, 8)?,
                    })
                },
            )
            .map_err(not_found)
    }

    /// Test hook and admin override for the day counter.
    pub fn set_warmup_day(&self, org_id: Uuid, ip_address: &str, day: i64) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE warmup_progress SET current_day = ?3 WHERE org_id = ?1 AND ip_address = ?2",
            params![org_id.to_string(), ip_address, day],
        )?)
    }

    /// Distinct `(org, ip)` pairs with an active warmup.
    pub fn list_warming_ips(&self) -> Result<Vec<WarmingIp>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT org_id, ip_address FROM warmup_progress
             WHERE status = 'active' ORDER BY org_id, ip_address",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WarmingIp {
                org_id: uuid_at(row, 0)?,
                ip_address: row.get(1)?,
            })
        })?;

        let mut ips = Vec::new();
        for row in rows {
            ips.push(row?);
        }
        Ok(ips)
    }

    /// Pause every active warmup of the org.
    pub fn pause_org_warmups(&self, org_id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE warmup_progress SET status = 'paused', pause_reason = ?2, updated_at = ?3
             WHERE org_id = ?1 AND status = 'active'",
            params![org_id.to_string(), reason, ts(&at)],
        )?)
    }

    /// Increment the day counter of every active warmup, then complete the
    /// ones past `duration_days`.  Returns `(advanced, completed)`.
    pub fn advance_warmups(&self, duration_days: i64, at: DateTime<Utc>) -> Result<(usize, usize)> {
        let advanced = self.conn().execute(
            "UPDATE warmup_progress SET current_day = current_day + 1, updated_at = ?1
             WHERE status = 'active'",
            params![ts(&at)],
        )?;
        let completed = self.conn().execute(
            "UPDATE warmup_progress SET status = 'completed', completed_at = ?1, updated_at = ?1
             WHERE status = 'active' AND current_day > ?2",
            params![ts(&at), duration_days],
        )?;
        Ok((advanced, completed))
    }
}
