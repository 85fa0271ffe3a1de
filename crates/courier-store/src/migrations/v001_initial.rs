//! v001 -- Initial schema creation.
//!
//! Creates the tenant tables (`organizations`, `users`), both message tables,
//! the append-only `delivery_events` log and the per-org address tables
//! (`suppression_list`, `contacts`, `campaigns`).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Organizations & users (read-only here)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS organizations (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    org_id     TEXT NOT NULL,
    email      TEXT NOT NULL,
    role       TEXT NOT NULL DEFAULT 'member',  -- owner / admin / member
    created_at TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_users_org_role ON users(org_id, role);

-- ----------------------------------------------------------------
-- Messages (transactional sends, then inbound-tracked fallback)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS transactional_emails (
    id                  TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    org_id              TEXT NOT NULL,               -- FK -> organizations(id)
    provider_message_id TEXT UNIQUE,                 -- NULL until accepted by the provider
    from_address        TEXT NOT NULL,
    to_addresses        TEXT NOT NULL,               -- JSON array
    subject             TEXT NOT NULL DEFAULT '',
    status              TEXT NOT NULL DEFAULT 'queued',
    sent_at             TEXT,
    delivered_at        TEXT,
    opened_at           TEXT,
    clicked_at          TEXT,
    bounced_at          TEXT,
    bounce_type         TEXT,                        -- hard / soft
    bounce_reason       TEXT,
    created_at          TEXT NOT NULL,               -- RFC-3339 UTC
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactional_emails_org_created ON transactional_emails(org_id, created_at);

CREATE TABLE IF NOT EXISTS emails (
    id                  TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    org_id              TEXT NOT NULL,               -- FK -> organizations(id)
    provider_message_id TEXT UNIQUE,                 -- NULL until accepted by the provider
    from_address        TEXT NOT NULL,
    to_addresses        TEXT NOT NULL,               -- JSON array
    subject             TEXT NOT NULL DEFAULT '',
    status              TEXT NOT NULL DEFAULT 'queued',
    sent_at             TEXT,
    delivered_at        TEXT,
    opened_at           TEXT,
    clicked_at          TEXT,
    bounced_at          TEXT,
    bounce_type         TEXT,                        -- hard / soft
    bounce_reason       TEXT,
    created_at          TEXT NOT NULL,               -- RFC-3339 UTC
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_emails_org_created ON emails(org_id, created_at);

-- ----------------------------------------------------------------
-- Delivery events (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS delivery_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    message_table TEXT NOT NULL,              -- transactional_emails / emails
    message_id    TEXT NOT NULL,
    org_id        TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    details       TEXT NOT NULL DEFAULT '',
    ip_address    TEXT,
    user_agent    TEXT,
    occurred_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_delivery_events_message
    ON delivery_events(message_table, message_id, occurred_at);

-- ----------------------------------------------------------------
-- Suppression list
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS suppression_list (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id     TEXT NOT NULL,
    email      TEXT NOT NULL,                 -- always lower-cased
    reason     TEXT NOT NULL,                 -- hard_bounce / complaint / unsubscribe
    source     TEXT NOT NULL,
    detail     TEXT,
    created_at TEXT NOT NULL,

    UNIQUE (org_id, email)
);

-- ----------------------------------------------------------------
-- Contacts & campaigns (owned elsewhere, touched by remediation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id         TEXT PRIMARY KEY NOT NULL,
    org_id     TEXT NOT NULL,
    email      TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'active',
    updated_at TEXT NOT NULL,

    UNIQUE (org_id, email)
);

CREATE TABLE IF NOT EXISTS campaigns (
    id         TEXT PRIMARY KEY NOT NULL,
    org_id     TEXT NOT NULL,
    name       TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'draft',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_campaigns_org_status ON campaigns(org_id, status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
