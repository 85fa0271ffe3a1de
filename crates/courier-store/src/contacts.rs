//! Contact and campaign state touched by bounce handling and remediation.
//! Both tables are owned by other services; only status columns change here.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use courier_shared::types::CampaignStatus;

use crate::codec::ts;
use crate::database::Database;
use crate::error::{not_found, Result};

impl Database {
    pub fn insert_contact(&self, org_id: Uuid, email: &str, at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO contacts (id, org_id, email, status, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4)",
            params![id.to_string(), org_id.to_string(), email.trim().to_lowercase(), ts(&at)],
        )?;
        Ok(id)
    }

    /// Mark the org's contact with this address as bounced, if one exists.
    pub fn mark_contact_bounced(&self, org_id: Uuid, email: &str, at: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE contacts SET status = 'bounced', updated_at = ?3
             WHERE org_id = ?1 AND email = ?2",
            params![org_id.to_string(), email.trim().to_lowercase(), ts(&at)],
        )?)
    }

    pub fn contact_status(&self, org_id: Uuid, email: &str) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT status FROM contacts WHERE org_id = ?1 AND email = ?2",
                params![org_id.to_string(), email.trim().to_lowercase()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }

    pub fn insert_campaign(
        &self,
        org_id: Uuid,
        name: &str,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO campaigns (id, org_id, name, status, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), org_id.to_string(), name, status.as_str(), ts(&at)],
        )?;
        Ok(id)
    }

    /// Move every `sending` campaign of the org to `paused`.
    pub fn pause_sending_campaigns(&self, org_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE campaigns SET status = 'paused', updated_at = ?2
             WHERE org_id = ?1 AND status = 'sending'",
            params![org_id.to_string(), ts(&at)],
        )?)
    }

    pub fn campaign_status(&self, id: Uuid) -> Result<CampaignStatus> {
        self.conn()
            .query_row(
                "SELECT status FROM campaigns WHERE id = ?1",
                params![id.to_string()],
                |row| crate::codec::enum_at(row, 0),
            )
            .map_err(not_found)
    }
}
