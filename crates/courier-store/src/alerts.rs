use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::codec::{enum_at, json_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::Result;
use crate::models::{Alert, DigestTarget, NewAlert};

impl Database {
    pub fn insert_alert(&self, alert: &NewAlert, at: DateTime<Utc>) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO alerts (org_id, alert_type, severity, title, message, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alert.org_id.to_string(),
                alert.kind.as_str(),
                alert.severity.as_str(),
                alert.title,
                alert.message,
                serde_json::to_string(&alert.data)?,
                ts(&at),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn acknowledge_alert(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("UPDATE alerts SET acknowledged = 1 WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn list_alerts(&self, org_id: Uuid) -> Result<Vec<Alert>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, org_id, alert_type, severity, title, message, data, acknowledged, created_at
             FROM alerts WHERE org_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![org_id.to_string()], |row| {
            Ok(Alert {
                id: row.get(0)?,
                org_id: uuid_at(row, 1)?,
                kind: enum_at(row, 2)?,
                severity: enum_at(row, 3)?,
                title: row.get(4)?,
                message: row.get(5)?,
                data: json_at(row, 6)?,
                acknowledged: row.get(7)?,
                created_at: ts_at(row, 8)?,
            })
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    /// Orgs with unacknowledged alerts created at or after `since`, each
    /// joined with its owner.  Orgs without an owner are skipped.
    pub fn list_digest_targets(&self, since: DateTime<Utc>) -> Result<Vec<DigestTarget>> {
        let mut stmt = self.conn().prepare(
            "SELECT a.org_id,
                    o.name,
                    u.email,
                    COUNT(*) AS alert_count,
                    SUM(CASE WHEN a.severity = 'critical' THEN 1 ELSE 0 END) AS critical_count
             FROM alerts a
             JOIN organizations o ON o.id = a.org_id
             JOIN users u ON u.org_id = a.org_id AND u.role = 'owner'
             WHERE a.acknowledged = 0 AND a.created_at >= ?1
             GROUP BY a.org_id, o.name, u.email
             HAVING COUNT(*) > 0
             ORDER BY o.name",
        )?;
        let rows = stmt.query_map(params![ts(&since)], |row| {
            Ok(DigestTarget {
                org_id: uuid_at(row, 0)?,
                org_name: row.get(1)?,
                owner_email: row.get(2)?,
                alert_count: row.get(3)?,
                critical_count: row.get(4)?,
            })
        })?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        Ok(targets)
    }
}
