//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Platform data-directory location of the store:
    /// - Linux:   `~/.local/share/crypter/crypterdb.sqlite`
    /// - macOS:   `~/Library/Application Support/com.crypter.crypter/crypterdb.sqlite`
    /// - Windows: `{FOLDERID_RoamingAppData}\crypter\crypter\data\crypterdb.sqlite`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "crypter", "crypter").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("crypterdb.sqlite"))
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a SQLCipher database at `path` keyed with a raw 256-bit key.
    #[cfg(feature = "sqlcipher")]
    pub fn open_encrypted(path: &Path, key: &[u8; 32]) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Raw key syntax skips SQLCipher's own passphrase KDF.
        conn.execute_batch(&format!("PRAGMA key = \"x'{}'\";", hex::encode(key)))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Drop every collection and recreate an empty schema.
    pub fn destroy(&self) -> Result<()> {
        tracing::warn!("destroying local store");
        self.conn.execute_batch(migrations::TEARDOWN_SQL)?;
        self.conn.pragma_update(None, "user_version", 0)?;
        migrations::run_migrations(&self.conn)
    }
}
