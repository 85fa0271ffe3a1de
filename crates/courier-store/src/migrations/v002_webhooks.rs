//! v002 -- Webhook subscriptions and delivery history.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS webhooks (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    org_id     TEXT NOT NULL,
    name       TEXT NOT NULL DEFAULT '',
    url        TEXT NOT NULL,
    secret     TEXT NOT NULL DEFAULT '',      -- base64(nonce || ciphertext), '' when unsigned
    events     TEXT NOT NULL DEFAULT '[]',    -- JSON array of event names
    active     INTEGER NOT NULL DEFAULT 1,    -- boolean 0/1
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_webhooks_org_active ON webhooks(org_id, active);

CREATE TABLE IF NOT EXISTS webhook_calls (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    webhook_id       TEXT NOT NULL,
    event_type       TEXT NOT NULL,
    payload          TEXT NOT NULL,           -- JSON snapshot
    response_status  INTEGER,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL,           -- success / failed / error
    attempts         INTEGER NOT NULL,
    error            TEXT,
    created_at       TEXT NOT NULL,

    FOREIGN KEY (webhook_id) REFERENCES webhooks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_webhook_calls_webhook_created
    ON webhook_calls(webhook_id, created_at DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
