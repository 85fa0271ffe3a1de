//! v003 -- Warmup progress, blacklist sweeps and operator alerts.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS warmup_progress (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id        TEXT NOT NULL,
    ip_address    TEXT NOT NULL,
    schedule_name TEXT NOT NULL DEFAULT 'default',
    current_day   INTEGER NOT NULL DEFAULT 1,
    status        TEXT NOT NULL DEFAULT 'active',  -- active / paused / completed
    pause_reason  TEXT,
    started_at    TEXT NOT NULL,
    completed_at  TEXT,
    updated_at    TEXT NOT NULL,

    UNIQUE (org_id, ip_address)
);

CREATE TABLE IF NOT EXISTS blacklist_checks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address   TEXT NOT NULL,
    listed_count INTEGER NOT NULL,
    results      TEXT NOT NULL,               -- JSON array of per-RBL results
    checked_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blacklist_checks_ip ON blacklist_checks(ip_address, checked_at DESC);

CREATE TABLE IF NOT EXISTS alerts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id       TEXT NOT NULL,
    alert_type   TEXT NOT NULL,               -- blacklist / bounce_rate
    severity     TEXT NOT NULL,               -- warning / critical
    title        TEXT NOT NULL,
    message      TEXT NOT NULL,
    data         TEXT NOT NULL DEFAULT '{}',
    acknowledged INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_org_created ON alerts(org_id, created_at);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
