//! Message lookup and the status transitions driven by provider notifications.
//!
//! Every update carries its precondition in the `WHERE` clause and returns the
//! number of rows changed, so callers can tell a no-op from an applied change.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use courier_shared::types::{BounceKind, MessageStatus};

use crate::codec::{enum_at, json_at, opt_ts_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{BounceStats, Message, MessageRef, MessageTable, NewMessage};

const MESSAGE_COLUMNS: &str = "id, org_id, provider_message_id, from_address, to_addresses, subject,
     status, sent_at, delivered_at, opened_at, clicked_at, bounced_at, bounce_type,
     bounce_reason, created_at, updated_at";

impl Database {
    pub fn insert_message(&self, table: MessageTable, message: &NewMessage) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, org_id, provider_message_id, from_address, to_addresses,
                             subject, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            table.table_name()
        );
        self.conn().execute(
            &sql,
            params![
                message.id.to_string(),
                message.org_id.to_string(),
                message.provider_message_id,
                message.from_address,
                serde_json::to_string(&message.to_addresses)?,
                message.subject,
                message.status.as_str(),
                ts(&message.created_at),
            ],
        )?;
        Ok(())
    }

    /// Resolve a provider message id, checking `transactional_emails` before
    /// `emails`.  `None` means the message belongs to another system.
    pub fn find_message_by_provider_id(&self, provider_id: &str) -> Result<Option<MessageRef>> {
        for table in MessageTable::LOOKUP_ORDER {
            let sql = format!(
                "SELECT id, org_id FROM {} WHERE provider_message_id = ?1",
                table.table_name()
            );
            let found = self
                .conn()
                .query_row(&sql, params![provider_id], |row| {
                    Ok(MessageRef {
                        table,
                        id: uuid_at(row, 0)?,
                        org_id: uuid_at(row, 1)?,
                    })
                })
                .optional()?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    pub fn get_message(&self, table: MessageTable, id: Uuid) -> Result<Message> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} WHERE id = ?1",
            table.table_name()
        );
        self.conn()
            .query_row(&sql, params![id.to_string()], |row| row_to_message(table, row))
            .map_err(not_found)
    }

    pub fn mark_bounced(
        &self,
        msg: &MessageRef,
        kind: BounceKind,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET status = 'bounced', bounced_at = ?2, bounce_type = ?3,
                           bounce_reason = ?4, updated_at = ?2
             WHERE id = ?1",
            msg.table.table_name()
        );
        Ok(self.conn().execute(
            &sql,
            params![msg.id.to_string(), ts(&at), kind.as_str(), reason],
        )?)
    }

    pub fn mark_complained(&self, msg: &MessageRef, at: DateTime<Utc>) -> Result<usize> {
        self.set_status(msg, MessageStatus::Complained, at)
    }

    pub fn mark_delivered(&self, msg: &MessageRef, at: DateTime<Utc>) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET status = 'delivered', delivered_at = ?2, updated_at = ?2
             WHERE id = ?1",
            msg.table.table_name()
        );
        Ok(self
            .conn()
            .execute(&sql, params![msg.id.to_string(), ts(&at)])?)
    }

    /// Only advances messages still `queued` or `sending`; a late Send
    /// notification never regresses a delivered or bounced message.
    pub fn mark_sent(&self, msg: &MessageRef, at: DateTime<Utc>) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET status = 'sent', sent_at = COALESCE(sent_at, ?2), updated_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'sending')",
            msg.table.table_name()
        );
        Ok(self
            .conn()
            .execute(&sql, params![msg.id.to_string(), ts(&at)])?)
    }

    pub fn mark_failed(&self, msg: &MessageRef, at: DateTime<Utc>) -> Result<usize> {
        self.set_status(msg, MessageStatus::Failed, at)
    }

    /// Sets `opened_at` on the first open only.
    pub fn record_first_open(&self, msg: &MessageRef, at: DateTime<Utc>) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET opened_at = ?2, updated_at = ?2 WHERE id = ?1 AND opened_at IS NULL",
            msg.table.table_name()
        );
        Ok(self
            .conn()
            .execute(&sql, params![msg.id.to_string(), ts(&at)])?)
    }

    /// Sets `clicked_at` on the first click only.
    pub fn record_first_click(&self, msg: &MessageRef, at: DateTime<Utc>) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET clicked_at = ?2, updated_at = ?2 WHERE id = ?1 AND clicked_at IS NULL",
            msg.table.table_name()
        );
        Ok(self
            .conn()
            .execute(&sql, params![msg.id.to_string(), ts(&at)])?)
    }

    fn set_status(&self, msg: &MessageRef, status: MessageStatus, at: DateTime<Utc>) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET status = ?2, updated_at = ?3 WHERE id = ?1",
            msg.table.table_name()
        );
        Ok(self.conn().execute(
            &sql,
            params![msg.id.to_string(), status.as_str(), ts(&at)],
        )?)
    }

    /// Per-org dispatched volume and bounces across both message tables for
    /// messages created at or after `since`.  Orgs below `min_total` are
    /// omitted.  Messages still `queued` or `sending` do not count.
    pub fn bounce_stats_since(&self, since: DateTime<Utc>, min_total: i64) -> Result<Vec<BounceStats>> {
        let mut stmt = self.conn().prepare(
            "SELECT org_id,
                    COUNT(*) AS total,
                    SUM(CASE WHEN status = 'bounced' THEN 1 ELSE 0 END) AS bounced
             FROM (
                 SELECT org_id, status FROM transactional_emails
                 WHERE created_at >= ?1 AND status NOT IN ('queued', 'sending')
                 UNION ALL
                 SELECT org_id, status FROM emails
                 WHERE created_at >= ?1 AND status NOT IN ('queued', 'sending')
             )
             GROUP BY org_id
             HAVING COUNT(*) >= ?2
             ORDER BY org_id",
        )?;

        let rows = stmt.query_map(params![ts(&since), min_total], |row| {
            Ok(BounceStats {
                org_id: uuid_at(row, 0)?,
                total: row.get(1)?,
                bounced: row.get(2)?,
            })
        })?;

        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }
}

fn row_to_message(table: MessageTable, row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let bounce_type: Option<String> = row.get(12)?;
    let bounce_type = bounce_type
        .map(|s| {
            s.parse::<BounceKind>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
            })
        })
        .transpose()?;

    Ok(Message {
        table,
        id: uuid_at(row, 0)?,
        org_id: uuid_at(row, 1)?,
        provider_message_id: row.get(2)?,
        from_address: row.get(3)?,
        to_addresses: json_at(row, 4)?,
        subject: row.get(5)?,
        status: enum_at(row, 6)?,
        sent_at: opt_ts_at(row, 7)?,
        delivered_at: opt_ts_at(row, 8)?,
        opened_at: opt_ts_at(row, 9)?,
        clicked_at: opt_ts_at(row, 10)?,
        bounced_at: opt_ts_at(row, 11)?,
        bounce_type,
        bounce_reason: row.get(13)?,
        created_at: ts_at(row, 14)?,
        updated_at: ts_at(row, 15)?,
    })
}
