//! Database migration runner.
//!
//! Migrations are executed in order every time a [`Database`] is opened.
//! Each migration is guarded by a `user_version` pragma so it runs exactly
//! once.
//!
//! [`Database`]: crate::Database

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.  Bump this and add a new migration module whenever
/// the schema changes.
const CURRENT_VERSION: u32 = 1;

/// Drops every collection; used by [`crate::Database::destroy`].
pub(crate) const TEARDOWN_SQL: &str = r#"
DROP TABLE IF EXISTS messages;
DROP TABLE IF EXISTS conferences;
DROP TABLE IF EXISTS users;
"#;

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
