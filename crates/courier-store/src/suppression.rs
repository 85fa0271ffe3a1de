use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use courier_shared::types::SuppressionReason;

use crate::codec::{enum_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::Result;
use crate::models::SuppressionEntry;

impl Database {
    /// Add an address to an org's suppression list.
    ///
    /// The address is lower-cased; an existing `(org, email)` entry is left
    /// untouched.  Returns `true` when a new row was written.
    pub fn suppress_address(
        &self,
        org_id: Uuid,
        email: &str,
        reason: SuppressionReason,
        source: &str,
        detail: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO suppression_list (org_id, email, reason, source, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (org_id, email) DO NOTHING",
            params![
                org_id.to_string(),
                email.trim().to_lowercase(),
                reason.as_str(),
                source,
                detail.filter(|d| !d.is_empty()),
                ts(&at),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn is_suppressed(&self, org_id: Uuid, email: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM suppression_list WHERE org_id = ?1 AND email = ?2",
            params![org_id.to_string(), email.trim().to_lowercase()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_suppressions(&self, org_id: Uuid) -> Result<Vec<SuppressionEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT org_id, email, reason, source, detail, created_at
             FROM suppression_list WHERE org_id = ?1 ORDER BY email",
        )?;
        let rows = stmt.query_map(params![org_id.to_string()], |row| {
            Ok(SuppressionEntry {
                org_id: uuid_at(row, 0)?,
                email: row.get(1)?,
                reason: enum_at::<SuppressionReason>(row, 2)?,
                source: row.get(3)?,
                detail: row.get(4)?,
                created_at: ts_at(row, 5)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
