//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `messages`, `online_status`, `cooldowns`,
//! and `ip_blocks`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- Integer autoincrement ids are load-bearing: the getNewMessages
-- polling cursor relies on ids being monotonic.
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id       TEXT NOT NULL,
    recipient_id    TEXT NOT NULL,
    text            TEXT NOT NULL DEFAULT '',    -- never NULL, even attachment-only
    attachment_kind TEXT NOT NULL DEFAULT 'none',-- none | image | file
    attachment_url  TEXT,
    attachment_name TEXT,
    attachment_size INTEGER,
    is_read         INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at      TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_read
    ON messages(recipient_id, is_read);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, recipient_id, created_at DESC);

-- ----------------------------------------------------------------
-- Presence
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS online_status (
    user_id   TEXT PRIMARY KEY NOT NULL,
    status    TEXT NOT NULL DEFAULT 'online',    -- online | away | offline
    last_seen TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Cooldowns
-- ----------------------------------------------------------------
-- Optional user/ip scope parts are stored as '' rather than NULL so the
-- composite primary key keeps the full scope key unique.
CREATE TABLE IF NOT EXISTS cooldowns (
    action_type       TEXT NOT NULL,
    action_identifier TEXT NOT NULL,
    user_id           TEXT NOT NULL DEFAULT '',
    ip_address        TEXT NOT NULL DEFAULT '',
    expires_at        TEXT NOT NULL,
    attempt_count     INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL,

    PRIMARY KEY (action_type, action_identifier, user_id, ip_address)
);

CREATE INDEX IF NOT EXISTS idx_cooldowns_expires
    ON cooldowns(expires_at);

-- ----------------------------------------------------------------
-- IP blocks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS ip_blocks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address   TEXT NOT NULL UNIQUE,
    reason       TEXT,
    blocked_by   TEXT,
    expires_at   TEXT,                           -- NULL = no expiry
    is_permanent INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ip_blocks_expires
    ON ip_blocks(is_permanent, expires_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
