use rusqlite::params;

use crate::codec::{json_at, ts, ts_at};
use crate::database::Database;
use crate::error::Result;
use crate::models::BlacklistCheck;

impl Database {
    pub fn insert_blacklist_check(&self, check: &BlacklistCheck) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO blacklist_checks (ip_address, listed_count, results, checked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                check.ip_address,
                check.listed_count as i64,
                serde_json::to_string(&check.results)?,
                ts(&check.checked_at),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Sweeps for one IP, newest first.
    pub fn list_blacklist_checks(&self, ip_address: &str, limit: u32) -> Result<Vec<BlacklistCheck>> {
        let mut stmt = self.conn().prepare(
            "SELECT ip_address, listed_count, results, checked_at
             FROM blacklist_checks WHERE ip_address = ?1
             ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ip_address, limit], |row| {
            let listed: i64 = row.get(1)?;
            Ok(BlacklistCheck {
                ip_address: row.get(0)?,
                listed_count: listed.max(0) as usize,
                results: json_at(row, 2)?,
                checked_at: ts_at(row, 3)?,
            })
        })?;

        let mut checks = Vec::new();
        for row in rows {
            checks.push(row?);
        }
        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RblResult;
    use chrono::Utc;

    #[test]
    fn test_check_results_persist_as_json() {
        let db = Database::open_in_memory().unwrap();
        let check = BlacklistCheck {
            ip_address: "192.0.2.10".into(),
            listed_count: 1,
            results: vec![RblResult {
                rbl: "Spamcop".into(),
                zone: "bl.spamcop.net".into(),
                listed: true,
                reason: Some("Listed (response: 127.0.0.2)".into()),
                delist_url: "https://www.spamcop.net/bl.shtml?192.0.2.10".into(),
            }],
            checked_at: Utc::now(),
        };
        db.insert_blacklist_check(&check).unwrap();

        let stored = db.list_blacklist_checks("192.0.2.10", 5).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].listed_count, 1);
        assert_eq!(stored[0].results, check.results);
    }
}
