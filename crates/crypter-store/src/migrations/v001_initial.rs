//! v001 -- Initial schema creation.
//!
//! Creates the three document collections. Each row stores the full JSON
//! document in `doc`; the other columns mirror the fields used for ordering
//! and scoping so they can be indexed.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    uuid       TEXT PRIMARY KEY NOT NULL,
    last_seen  INTEGER,                       -- epoch seconds
    doc        TEXT NOT NULL                  -- JSON document
);

-- ----------------------------------------------------------------
-- Conferences
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conferences (
    uuid        TEXT PRIMARY KEY NOT NULL,
    updated_at  INTEGER NOT NULL DEFAULT 0,   -- epoch seconds
    participant TEXT,                         -- users(uuid)
    doc         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conferences_updated_at ON conferences(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_conferences_participant ON conferences(participant);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    uuid        TEXT PRIMARY KEY NOT NULL,
    conference  TEXT NOT NULL,                -- conferences(uuid)
    author      TEXT NOT NULL,                -- users(uuid)
    date        INTEGER NOT NULL,             -- epoch seconds
    read        INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    read_at     INTEGER,
    doc         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conference_date ON messages(conference, date);
CREATE INDEX IF NOT EXISTS idx_messages_read_date ON messages(read, date);
CREATE INDEX IF NOT EXISTS idx_messages_read_at ON messages(read_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
