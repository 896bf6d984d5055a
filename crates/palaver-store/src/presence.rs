//! Per-user presence: heartbeat upserts, online listings, idle sweeps.
//!
//! `touch` is called on every authenticated request, not just login.  Users
//! who disconnect without a clean logout are reclaimed by [`Database::sweep_idle`],
//! driven by an external scheduler -- the tracker itself has no timers.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::{PresenceRecord, PresenceStatus};

/// User ids carrying this prefix are ephemeral guest accounts and stay out
/// of online listings.
const GUEST_PREFIX: &str = "guest_";

impl Database {
    /// Heartbeat: insert the record if absent, else set `status` and refresh
    /// `last_seen`.  One operation covers creation and update.
    pub fn touch_presence(&self, user_id: &str, status: PresenceStatus) -> Result<()> {
        self.conn().execute(
            "INSERT INTO online_status (user_id, status, last_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 status = excluded.status,
                 last_seen = excluded.last_seen",
            params![user_id, status.as_str(), self.now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Fetch a single presence record, if the user has ever been seen.
    pub fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        self.conn()
            .query_row(
                "SELECT user_id, status, last_seen FROM online_status WHERE user_id = ?1",
                params![user_id],
                row_to_presence,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
    }

    /// Everyone currently online, most-recently-seen first, guests excluded.
    ///
    /// This listing backs a read-heavy, non-critical page, so it degrades to
    /// an empty result on store failure instead of failing the whole page.
    pub fn list_online(&self) -> Vec<PresenceRecord> {
        match self.query_online() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "online listing failed, degrading to empty");
                Vec::new()
            }
        }
    }

    fn query_online(&self) -> Result<Vec<PresenceRecord>> {
        // substr rather than LIKE: the underscore in the prefix would act as
        // a single-character wildcard and drop ids like "guests".
        let mut stmt = self.conn().prepare(
            "SELECT user_id, status, last_seen FROM online_status
             WHERE status = 'online' AND substr(user_id, 1, ?1) <> ?2
             ORDER BY last_seen DESC",
        )?;

        let rows = stmt.query_map(params![GUEST_PREFIX.len() as i64, GUEST_PREFIX], row_to_presence)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// All presence records in the platform-wide listing order:
    /// online < away < offline, then most-recently-seen first.
    pub fn list_presence(&self) -> Result<Vec<PresenceRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, status, last_seen FROM online_status
             ORDER BY CASE status
                 WHEN 'online'  THEN 0
                 WHEN 'away'    THEN 1
                 ELSE 2
             END ASC, last_seen DESC",
        )?;

        let rows = stmt.query_map([], row_to_presence)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Explicit transition on logout.  Returns `false` if the user has no
    /// presence record.
    pub fn set_offline(&self, user_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE online_status SET status = 'offline', last_seen = ?2
             WHERE user_id = ?1",
            params![user_id, self.now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Transition every `online` record whose `last_seen` is older than
    /// `idle_minutes` to `offline`.  Returns how many records transitioned.
    pub fn sweep_idle(&self, idle_minutes: i64) -> Result<usize> {
        let cutoff = self.now() - Duration::minutes(idle_minutes);

        let affected = self.conn().execute(
            "UPDATE online_status SET status = 'offline'
             WHERE status = 'online' AND last_seen < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        if affected > 0 {
            tracing::debug!(count = affected, "idle presence sweep");
        }
        Ok(affected)
    }
}

/// Map a `rusqlite::Row` to a [`PresenceRecord`].
fn row_to_presence(row: &rusqlite::Row<'_>) -> rusqlite::Result<PresenceRecord> {
    let status_str: String = row.get(1)?;
    let status: PresenceStatus = status_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let ts_str: String = row.get(2)?;
    let last_seen: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(PresenceRecord {
        user_id: row.get(0)?,
        status,
        last_seen,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;

    fn test_db() -> (tempfile::TempDir, Database, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let db = Database::open_with_clock(&dir.path().join("test.db"), clock.clone()).unwrap();
        (dir, db, clock)
    }

    #[test]
    fn touch_upserts_one_record() {
        let (_dir, db, clock) = test_db();

        db.touch_presence("alice", PresenceStatus::Online).unwrap();
        let first = db.get_presence("alice").unwrap().unwrap();

        clock.advance(Duration::seconds(30));
        db.touch_presence("alice", PresenceStatus::Away).unwrap();
        let second = db.get_presence("alice").unwrap().unwrap();

        assert_eq!(second.status, PresenceStatus::Away);
        assert!(second.last_seen > first.last_seen);
        assert_eq!(db.list_presence().unwrap().len(), 1);
    }

    #[test]
    fn unseen_user_has_no_record() {
        let (_dir, db, _clock) = test_db();
        assert!(db.get_presence("nobody").unwrap().is_none());
    }

    #[test]
    fn list_online_excludes_guests_and_non_online() {
        let (_dir, db, clock) = test_db();

        db.touch_presence("alice", PresenceStatus::Online).unwrap();
        clock.advance(Duration::seconds(1));
        db.touch_presence("bob", PresenceStatus::Online).unwrap();
        db.touch_presence("carol", PresenceStatus::Away).unwrap();
        db.touch_presence("guest_77", PresenceStatus::Online).unwrap();

        let online = db.list_online();
        let ids: Vec<&str> = online.iter().map(|r| r.user_id.as_str()).collect();
        // Most recently seen first.
        assert_eq!(ids, ["bob", "alice"]);
    }

    #[test]
    fn guest_lookalike_ids_stay_listed() {
        let (_dir, db, clock) = test_db();

        // Ids that start with "guest" but lack the underscore prefix are
        // ordinary accounts and must not be swallowed by the guest filter.
        db.touch_presence("guests", PresenceStatus::Online).unwrap();
        clock.advance(Duration::seconds(1));
        db.touch_presence("guestav", PresenceStatus::Online).unwrap();
        db.touch_presence("guest_1", PresenceStatus::Online).unwrap();

        let online = db.list_online();
        let ids: Vec<&str> = online.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(ids, ["guestav", "guests"]);
    }

    #[test]
    fn sweep_transitions_only_stale_online() {
        let (_dir, db, clock) = test_db();

        db.touch_presence("alice", PresenceStatus::Online).unwrap();
        clock.advance(Duration::minutes(6));
        db.touch_presence("bob", PresenceStatus::Online).unwrap();

        assert_eq!(db.sweep_idle(5).unwrap(), 1);
        assert_eq!(
            db.get_presence("alice").unwrap().unwrap().status,
            PresenceStatus::Offline
        );
        assert_eq!(
            db.get_presence("bob").unwrap().unwrap().status,
            PresenceStatus::Online
        );
    }

    #[test]
    fn fresh_record_survives_sweep() {
        let (_dir, db, clock) = test_db();

        db.touch_presence("alice", PresenceStatus::Online).unwrap();
        clock.advance(Duration::minutes(4));

        assert_eq!(db.sweep_idle(5).unwrap(), 0);
        assert_eq!(
            db.get_presence("alice").unwrap().unwrap().status,
            PresenceStatus::Online
        );
    }

    #[test]
    fn set_offline_is_explicit_and_idempotent() {
        let (_dir, db, _clock) = test_db();

        assert!(!db.set_offline("alice").unwrap());

        db.touch_presence("alice", PresenceStatus::Online).unwrap();
        assert!(db.set_offline("alice").unwrap());
        assert_eq!(
            db.get_presence("alice").unwrap().unwrap().status,
            PresenceStatus::Offline
        );
    }

    #[test]
    fn presence_listing_order_convention() {
        let (_dir, db, clock) = test_db();

        db.touch_presence("offline_old", PresenceStatus::Offline).unwrap();
        clock.advance(Duration::seconds(1));
        db.touch_presence("away_1", PresenceStatus::Away).unwrap();
        clock.advance(Duration::seconds(1));
        db.touch_presence("online_old", PresenceStatus::Online).unwrap();
        clock.advance(Duration::seconds(1));
        db.touch_presence("online_new", PresenceStatus::Online).unwrap();

        let all = db.list_presence().unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(ids, ["online_new", "online_old", "away_1", "offline_old"]);
    }
}
