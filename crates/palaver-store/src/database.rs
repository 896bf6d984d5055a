//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] plus the [`Clock`]
//! used for every timestamp and expiry comparison, and guarantees that
//! migrations are run before any other operation.
//!
//! The handle is passed explicitly into whatever layer needs it (no process
//! global), which is what makes parallel test isolation possible.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`] and a [`Clock`].
pub struct Database {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Open (or create) a database at an explicit path with the system clock.
    ///
    /// The path comes from deployment configuration; the store itself has no
    /// default location.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open (or create) a database with an injected clock.
    ///
    /// Tests pass a [`crate::ManualClock`] here and keep a second `Arc` to
    /// drive it.
    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn, clock })
    }

    /// Current instant according to the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed operation groups, but direct access is
    /// occasionally needed for transactions or ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn injected_clock_drives_now() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let db = Database::open_with_clock(&dir.path().join("test.db"), clock.clone()).unwrap();

        let t0 = db.now();
        clock.advance(Duration::minutes(10));
        assert_eq!(db.now() - t0, Duration::minutes(10));
    }
}
