//! v001 -- Initial schema creation.
//!
//! Creates the `messages` table. Timestamps are stored as RFC-3339 UTC
//! strings, which compare correctly as text, so the expiry sweep is a
//! single indexed range delete.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Ephemeral messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    session_id      TEXT,                       -- nullable: session may be long gone
    sender_conn     TEXT NOT NULL,              -- transient connection handle (UUID)
    sender_identity TEXT,                       -- nullable: anonymous senders allowed
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,              -- ISO-8601 / RFC-3339 UTC
    expires_at      TEXT NOT NULL               -- created_at + retention window
);

CREATE INDEX IF NOT EXISTS idx_messages_expires_at ON messages(expires_at);

CREATE INDEX IF NOT EXISTS idx_messages_session_ts
    ON messages(session_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
