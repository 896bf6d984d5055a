//! IP block list, permanent or time-limited, consulted before any mutating
//! action.
//!
//! Upserts are keyed on the unique `ip_address` column, so concurrent
//! writers need no locking beyond what SQLite's upsert gives them.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::IpBlockEntry;

impl Database {
    /// Block an address.  Re-blocking an already-blocked IP replaces reason,
    /// expiry and permanence, and resets the creation timestamp.  Returns the
    /// row id.
    pub fn block_ip(
        &self,
        ip_address: &str,
        reason: Option<&str>,
        blocked_by: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        is_permanent: bool,
    ) -> Result<i64> {
        let now = self.now();

        let id = self.conn().query_row(
            "INSERT INTO ip_blocks
                 (ip_address, reason, blocked_by, expires_at, is_permanent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(ip_address) DO UPDATE SET
                 reason = excluded.reason,
                 blocked_by = excluded.blocked_by,
                 expires_at = excluded.expires_at,
                 is_permanent = excluded.is_permanent,
                 created_at = excluded.created_at
             RETURNING id",
            params![
                ip_address,
                reason,
                blocked_by,
                expires_at.map(|t| t.to_rfc3339()),
                is_permanent,
                now.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;

        tracing::warn!(ip = ip_address, permanent = is_permanent, "IP blocked");
        Ok(id)
    }

    /// Remove a block by address.  Returns `false` when the IP was not
    /// blocked -- expected in normal operation, not an error.
    pub fn unblock_ip(&self, ip_address: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM ip_blocks WHERE ip_address = ?1",
            params![ip_address],
        )?;
        Ok(affected > 0)
    }

    /// Whether an active block exists for the address.  Expired rows are
    /// swept lazily first, so the predicate never sees stale state.
    pub fn is_ip_blocked(&self, ip_address: &str) -> Result<bool> {
        self.cleanup_expired_blocks()?;

        let blocked = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM ip_blocks
                 WHERE ip_address = ?1
                   AND (is_permanent = 1 OR expires_at IS NULL OR expires_at > ?2)
             )",
            params![ip_address, self.now().to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(blocked)
    }

    /// Delete all non-permanent entries past expiry.
    pub fn cleanup_expired_blocks(&self) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM ip_blocks
             WHERE is_permanent = 0 AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![self.now().to_rfc3339()],
        )?;
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Administrative reads / management
    // ------------------------------------------------------------------

    /// One page of the block list, newest first.
    pub fn list_ip_blocks(&self, limit: u32, offset: u32) -> Result<Vec<IpBlockEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, ip_address, reason, blocked_by, expires_at, is_permanent, created_at
             FROM ip_blocks
             ORDER BY created_at DESC, id DESC
             LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt.query_map(params![limit, offset], row_to_block)?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Fetch the entry for one address, expired or not.
    pub fn get_ip_block(&self, ip_address: &str) -> Result<Option<IpBlockEntry>> {
        self.conn()
            .query_row(
                "SELECT id, ip_address, reason, blocked_by, expires_at, is_permanent, created_at
                 FROM ip_blocks WHERE ip_address = ?1",
                params![ip_address],
                row_to_block,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
    }

    /// Delete a block by row id (admin tooling).
    pub fn delete_ip_block(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM ip_blocks WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to an [`IpBlockEntry`].
fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<IpBlockEntry> {
    let expires_str: Option<String> = row.get(4)?;
    let expires_at = expires_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;

    let created_str: String = row.get(6)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(IpBlockEntry {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        reason: row.get(2)?,
        blocked_by: row.get(3)?,
        expires_at,
        is_permanent: row.get(5)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn test_db() -> (tempfile::TempDir, Database, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let db = Database::open_with_clock(&dir.path().join("test.db"), clock.clone()).unwrap();
        (dir, db, clock)
    }

    #[test]
    fn permanent_block_never_expires() {
        let (_dir, db, clock) = test_db();

        db.block_ip("10.0.0.5", Some("spam"), Some("mod_7"), None, true)
            .unwrap();
        assert!(db.is_ip_blocked("10.0.0.5").unwrap());

        clock.advance(Duration::days(365));
        assert!(db.is_ip_blocked("10.0.0.5").unwrap());
        assert_eq!(db.cleanup_expired_blocks().unwrap(), 0);
    }

    #[test]
    fn timed_block_expires_and_is_swept() {
        let (_dir, db, clock) = test_db();

        let expiry = db.now() + Duration::seconds(60);
        db.block_ip("10.0.0.5", None, None, Some(expiry), false)
            .unwrap();

        clock.advance(Duration::seconds(30));
        assert!(db.is_ip_blocked("10.0.0.5").unwrap());

        clock.advance(Duration::seconds(31));
        assert!(!db.is_ip_blocked("10.0.0.5").unwrap());
        // The lazy sweep inside is_ip_blocked already removed it.
        assert!(db.get_ip_block("10.0.0.5").unwrap().is_none());
    }

    #[test]
    fn reblock_replaces_in_place() {
        let (_dir, db, clock) = test_db();

        let first = db
            .block_ip("10.0.0.5", Some("spam"), None, None, false)
            .unwrap();
        clock.advance(Duration::seconds(5));
        let second = db
            .block_ip("10.0.0.5", Some("ban evasion"), Some("mod_7"), None, true)
            .unwrap();
        assert_eq!(first, second);

        let entry = db.get_ip_block("10.0.0.5").unwrap().unwrap();
        assert_eq!(entry.reason.as_deref(), Some("ban evasion"));
        assert!(entry.is_permanent);
        assert_eq!(entry.created_at, db.now());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM ip_blocks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unblock_reports_whether_anything_changed() {
        let (_dir, db, _clock) = test_db();

        assert!(!db.unblock_ip("10.0.0.5").unwrap());
        db.block_ip("10.0.0.5", None, None, None, true).unwrap();
        assert!(db.unblock_ip("10.0.0.5").unwrap());
        assert!(!db.is_ip_blocked("10.0.0.5").unwrap());
    }

    #[test]
    fn block_without_expiry_is_active_until_unblocked() {
        let (_dir, db, clock) = test_db();

        // Not permanent, but no expiry either: stays active.
        db.block_ip("10.0.0.5", None, None, None, false).unwrap();
        clock.advance(Duration::days(30));
        assert!(db.is_ip_blocked("10.0.0.5").unwrap());
    }

    #[test]
    fn admin_listing_pages_newest_first() {
        let (_dir, db, clock) = test_db();

        for i in 0..3 {
            db.block_ip(&format!("10.0.0.{i}"), None, None, None, true)
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let page = db.list_ip_blocks(2, 0).unwrap();
        let ips: Vec<&str> = page.iter().map(|b| b.ip_address.as_str()).collect();
        assert_eq!(ips, ["10.0.0.2", "10.0.0.1"]);

        let rest = db.list_ip_blocks(2, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].ip_address, "10.0.0.0");
    }

    #[test]
    fn delete_by_row_id() {
        let (_dir, db, _clock) = test_db();

        let id = db.block_ip("10.0.0.5", None, None, None, true).unwrap();
        assert!(db.delete_ip_block(id).unwrap());
        assert!(!db.delete_ip_block(id).unwrap());
    }
}
