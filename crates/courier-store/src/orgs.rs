//! Organizations and users are managed elsewhere; these helpers exist for
//! seeding and for the digest owner lookup.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::codec::ts;
use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn insert_organization(&self, name: &str, at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name, ts(&at)],
        )?;
        Ok(id)
    }

    pub fn insert_user(&self, org_id: Uuid, email: &str, role: &str, at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO users (id, org_id, email, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), org_id.to_string(), email, role, ts(&at)],
        )?;
        Ok(id)
    }
}
