use rusqlite::params;

use crate::codec::{enum_at, ts, ts_at, uuid_at};
use crate::database::Database;
use crate::error::Result;
use crate::models::{DeliveryEvent, MessageRef, MessageTable, NewDeliveryEvent};

impl Database {
    pub fn insert_delivery_event(&self, msg: &MessageRef, event: &NewDeliveryEvent) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO delivery_events
                 (message_table, message_id, org_id, event_type, details, ip_address, user_agent, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                msg.table.table_name(),
                msg.id.to_string(),
                msg.org_id.to_string(),
                event.kind.as_str(),
                event.details,
                event.ip_address,
                event.user_agent,
                ts(&event.occurred_at),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Events for one message, oldest first.
    pub fn list_delivery_events(&self, msg: &MessageRef) -> Result<Vec<DeliveryEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_table, message_id, org_id, event_type, details,
                    ip_address, user_agent, occurred_at
             FROM delivery_events
             WHERE message_table = ?1 AND message_id = ?2
             ORDER BY occurred_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(
            params![msg.table.table_name(), msg.id.to_string()],
            row_to_event,
        )?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryEvent> {
    let table_name: String = row.get(1)?;
    let table = MessageTable::from_table_name(&table_name).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(1, table_name.clone(), rusqlite::types::Type::Text)
    })?;

    Ok(DeliveryEvent {
        id: row.get(0)?,
        message: MessageRef {
            table,
            id: uuid_at(row, 2)?,
            org_id: uuid_at(row, 3)?,
        },
        kind: enum_at(row, 4)?,
        details: row.get(5)?,
        ip_address: row.get(6)?,
        user_agent: row.get(7)?,
        occurred_at: ts_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::types::DeliveryEventKind;
    use uuid::Uuid;

    #[test]
    fn test_events_are_append_only_per_message() {
        let db = Database::open_in_memory().unwrap();
        let msg = MessageRef {
            table: MessageTable::Transactional,
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
        };
        let now = Utc::now();

        db.insert_delivery_event(&msg, &NewDeliveryEvent::new(DeliveryEventKind::Delivered, "ok", now))
            .unwrap();
        db.insert_delivery_event(
            &msg,
            &NewDeliveryEvent::new(DeliveryEventKind::Opened, "", now)
                .with_client(Some("203.0.113.9".into()), Some(String::new())),
        )
        .unwrap();

        let events = db.list_delivery_events(&msg).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, DeliveryEventKind::Delivered);
        assert_eq!(events[1].ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(events[1].user_agent, None);
    }
}
