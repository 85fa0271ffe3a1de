use rusqlite::params;
use uuid::Uuid;

use crate::codec::{enum_at, json_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{NewWebhookCall, Webhook, WebhookCall};

const WEBHOOK_COLUMNS: &str = "id, org_id, name, url, secret, events, active, created_at";

impl Database {
    pub fn insert_webhook(&self, webhook: &Webhook) -> Result<()> {
        self.conn().execute(
            "INSERT INTO webhooks (id, org_id, name, url, secret, events, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                webhook.id.to_string(),
                webhook.org_id.to_string(),
                webhook.name,
                webhook.url,
                webhook.secret,
                serde_json::to_string(&webhook.events)?,
                webhook.active,
                ts(&webhook.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_webhook(&self, id: Uuid) -> Result<Webhook> {
        self.conn()
            .query_row(
                &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1"),
                params![id.to_string()],
                row_to_webhook,
            )
            .map_err(not_found)
    }

    pub fn set_webhook_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE webhooks SET active = ?2 WHERE id = ?1",
            params![id.to_string(), active],
        )?;
        Ok(affected > 0)
    }

    /// Active webhooks of `org_id` whose event set contains `event`.
    pub fn list_subscribed_webhooks(&self, org_id: Uuid, event: &str) -> Result<Vec<Webhook>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks
             WHERE org_id = ?1
               AND active = 1
               AND EXISTS (SELECT 1 FROM json_each(webhooks.events) WHERE json_each.value = ?2)
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![org_id.to_string(), event], row_to_webhook)?;

        let mut webhooks = Vec::new();
        for row in rows {
            webhooks.push(row?);
        }
        Ok(webhooks)
    }

    pub fn insert_webhook_call(&self, call: &NewWebhookCall) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO webhook_calls
                 (webhook_id, event_type, payload, response_status, response_time_ms,
                  status, attempts, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                call.webhook_id.to_string(),
                call.event_type,
                serde_json::to_string(&call.payload)?,
                call.response_status,
                call.response_time_ms,
                call.status.as_str(),
                call.attempts,
                call.error,
                ts(&chrono::Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Delivery history for one webhook, newest first.
    pub fn list_webhook_calls(&self, webhook_id: Uuid, limit: u32) -> Result<Vec<WebhookCall>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, webhook_id, event_type, payload, response_status, response_time_ms,
                    status, attempts, error, created_at
             FROM webhook_calls
             WHERE webhook_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![webhook_id.to_string(), limit], |row| {
            Ok(WebhookCall {
                id: row.get(0)?,
                webhook_id: uuid_at(row, 1)?,
                event_type: row.get(2)?,
                payload: json_at(row, 3)?,
                response_status: row.get(4)?,
                response_time_ms: row.get(5)?,
                status: enum_at(row, 6)?,
                attempts: row.get(7)?,
                error: row.get(8)?,
                created_at: ts_at(row, 9)?,
            })
        })?;

        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }
}

fn row_to_webhook(row: &rusqlite::Row<'_>) -> rusqlite::Result<Webhook> {
    Ok(Webhook {
        id: uuid_at(row, 0)?,
        org_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        secret: row.get(4)?,
        events: json_at(row, 5)?,
        active: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}
