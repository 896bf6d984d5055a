//! Generic rate limiter keyed by `(action_type, action_identifier, user, ip)`.
//!
//! One table gates heterogeneous actions (message bursts, login attempts,
//! password resets, story posting) without a bespoke table per action.  The
//! guard is policy-agnostic: callers pick durations and read `attempt_count`
//! to drive their own escalation.
//!
//! `is_on_cooldown` followed later by `set_cooldown` is a check-then-act
//! pair; a stale read can let one extra action through during a race window.
//! Where the gated action has real cost, use [`Database::claim_cooldown`],
//! which decides and reserves in a single statement.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::CooldownEntry;

/// The tuple identifying a rate-limit bucket.
///
/// Optional `user`/`ip` parts are normalized to the empty string in storage,
/// so the composite primary key stays unique and lookups agree with upserts
/// on the same key.
#[derive(Debug, Clone, Copy)]
pub struct CooldownScope<'a> {
    pub action_type: &'a str,
    pub action_identifier: &'a str,
    pub user_id: Option<&'a str>,
    pub ip_address: Option<&'a str>,
}

impl<'a> CooldownScope<'a> {
    pub fn new(action_type: &'a str, action_identifier: &'a str) -> Self {
        Self {
            action_type,
            action_identifier,
            user_id: None,
            ip_address: None,
        }
    }

    pub fn for_user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn for_ip(mut self, ip_address: &'a str) -> Self {
        self.ip_address = Some(ip_address);
        self
    }

    fn user_key(&self) -> &str {
        self.user_id.unwrap_or("")
    }

    fn ip_key(&self) -> &str {
        self.ip_address.unwrap_or("")
    }
}

impl Database {
    /// Whether an unexpired entry exists for the scope key.  Sweeps expired
    /// rows first so a stale entry never reads as active.
    pub fn is_on_cooldown(&self, scope: CooldownScope<'_>) -> Result<bool> {
        self.cleanup_expired_cooldowns()?;

        let exists = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM cooldowns
                 WHERE action_type = ?1 AND action_identifier = ?2
                   AND user_id = ?3 AND ip_address = ?4
                   AND expires_at > ?5
             )",
            params![
                scope.action_type,
                scope.action_identifier,
                scope.user_key(),
                scope.ip_key(),
                self.now().to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Seconds until the cooldown lifts; zero when none is active.
    pub fn cooldown_remaining_secs(&self, scope: CooldownScope<'_>) -> Result<i64> {
        self.cleanup_expired_cooldowns()?;

        match self.get_cooldown(scope)? {
            None => Ok(0),
            Some(entry) => Ok((entry.expires_at - self.now()).num_seconds().max(0)),
        }
    }

    /// Fetch the full entry, e.g. to read `attempt_count` for escalation.
    pub fn get_cooldown(&self, scope: CooldownScope<'_>) -> Result<Option<CooldownEntry>> {
        self.conn()
            .query_row(
                "SELECT action_type, action_identifier, user_id, ip_address,
                        expires_at, attempt_count, created_at
                 FROM cooldowns
                 WHERE action_type = ?1 AND action_identifier = ?2
                   AND user_id = ?3 AND ip_address = ?4",
                params![
                    scope.action_type,
                    scope.action_identifier,
                    scope.user_key(),
                    scope.ip_key(),
                ],
                row_to_cooldown,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
    }

    /// Start or renew a cooldown.  A renewal on an existing key extends
    /// `expires_at` and increments `attempt_count` in place -- the counter
    /// grows monotonically, which is what escalation policies key off.
    pub fn set_cooldown(
        &self,
        scope: CooldownScope<'_>,
        duration_secs: i64,
        attempt_count: i64,
    ) -> Result<()> {
        let now = self.now();
        let expires_at = now + Duration::seconds(duration_secs);

        self.conn().execute(
            "INSERT INTO cooldowns
                 (action_type, action_identifier, user_id, ip_address,
                  expires_at, attempt_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(action_type, action_identifier, user_id, ip_address)
             DO UPDATE SET
                 expires_at = excluded.expires_at,
                 attempt_count = cooldowns.attempt_count + 1",
            params![
                scope.action_type,
                scope.action_identifier,
                scope.user_key(),
                scope.ip_key(),
                expires_at.to_rfc3339(),
                attempt_count,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Atomic claim-then-act: reserve the window and report whether *this*
    /// caller won it, in one statement.
    ///
    /// Wins when no entry exists or the existing one has expired; loses when
    /// an unexpired entry is already held.  Losing never mutates the row, so
    /// a burst of losers cannot extend each other's penalty.
    pub fn claim_cooldown(&self, scope: CooldownScope<'_>, duration_secs: i64) -> Result<bool> {
        let now = self.now();
        let expires_at = now + Duration::seconds(duration_secs);

        let affected = self.conn().execute(
            "INSERT INTO cooldowns
                 (action_type, action_identifier, user_id, ip_address,
                  expires_at, attempt_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT(action_type, action_identifier, user_id, ip_address)
             DO UPDATE SET
                 expires_at = excluded.expires_at,
                 attempt_count = cooldowns.attempt_count + 1,
                 created_at = excluded.created_at
             WHERE cooldowns.expires_at <= ?6",
            params![
                scope.action_type,
                scope.action_identifier,
                scope.user_key(),
                scope.ip_key(),
                expires_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Explicit removal: admin override, or a gated flow completed (e.g. a
    /// password reset consumed).  Returns `false` when no entry existed.
    pub fn clear_cooldown(&self, scope: CooldownScope<'_>) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM cooldowns
             WHERE action_type = ?1 AND action_identifier = ?2
               AND user_id = ?3 AND ip_address = ?4",
            params![
                scope.action_type,
                scope.action_identifier,
                scope.user_key(),
                scope.ip_key(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Delete every entry whose `expires_at` has passed.  Safe to call
    /// opportunistically and from a scheduled sweep.
    pub fn cleanup_expired_cooldowns(&self) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM cooldowns WHERE expires_at <= ?1",
            params![self.now().to_rfc3339()],
        )?;
        Ok(affected)
    }
}

/// Map a `rusqlite::Row` to a [`CooldownEntry`].
fn row_to_cooldown(row: &rusqlite::Row<'_>) -> rusqlite::Result<CooldownEntry> {
    let expires_str: String = row.get(4)?;
    let expires_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&expires_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_str: String = row.get(6)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CooldownEntry {
        action_type: row.get(0)?,
        action_identifier: row.get(1)?,
        user_id: row.get(2)?,
        ip_address: row.get(3)?,
        expires_at,
        attempt_count: row.get(5)?,
        created_at,
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

    fn send_scope() -> CooldownScope<'static> {
        CooldownScope::new("message_send", "dm").for_user("alice")
    }

    #[test]
    fn set_then_check() {
        let (_dir, db, _clock) = test_db();

        db.set_cooldown(send_scope(), 30, 1).unwrap();
        assert!(db.is_on_cooldown(send_scope()).unwrap());

        let remaining = db.cooldown_remaining_secs(send_scope()).unwrap();
        assert!(remaining > 0 && remaining <= 30);
    }

    #[test]
    fn expires_with_the_clock() {
        let (_dir, db, clock) = test_db();

        db.set_cooldown(send_scope(), 30, 1).unwrap();
        clock.advance(Duration::seconds(31));

        assert!(!db.is_on_cooldown(send_scope()).unwrap());
        assert_eq!(db.cooldown_remaining_secs(send_scope()).unwrap(), 0);
        // The lazy sweep inside the checks already removed the row.
        assert!(db.get_cooldown(send_scope()).unwrap().is_none());
    }

    #[test]
    fn renewal_increments_attempts_in_place() {
        let (_dir, db, _clock) = test_db();

        db.set_cooldown(send_scope(), 30, 1).unwrap();
        db.set_cooldown(send_scope(), 60, 1).unwrap();
        db.set_cooldown(send_scope(), 90, 1).unwrap();

        let entry = db.get_cooldown(send_scope()).unwrap().unwrap();
        assert_eq!(entry.attempt_count, 3);

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM cooldowns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn initial_attempt_count_is_caller_supplied() {
        let (_dir, db, _clock) = test_db();

        db.set_cooldown(send_scope(), 30, 5).unwrap();
        let entry = db.get_cooldown(send_scope()).unwrap().unwrap();
        assert_eq!(entry.attempt_count, 5);
    }

    #[test]
    fn scope_keys_are_independent() {
        let (_dir, db, _clock) = test_db();

        db.set_cooldown(send_scope(), 30, 1).unwrap();

        let other_user = CooldownScope::new("message_send", "dm").for_user("bob");
        assert!(!db.is_on_cooldown(other_user).unwrap());

        let other_action = CooldownScope::new("story_post", "dm").for_user("alice");
        assert!(!db.is_on_cooldown(other_action).unwrap());

        let ip_scoped = CooldownScope::new("login", "form").for_ip("10.0.0.5");
        db.set_cooldown(ip_scoped, 30, 1).unwrap();
        assert!(db.is_on_cooldown(ip_scoped).unwrap());
        assert!(!db.is_on_cooldown(CooldownScope::new("login", "form")).unwrap());
    }

    #[test]
    fn claim_wins_once_per_window() {
        let (_dir, db, clock) = test_db();

        assert!(db.claim_cooldown(send_scope(), 10).unwrap());
        assert!(!db.claim_cooldown(send_scope(), 10).unwrap());
        assert!(!db.claim_cooldown(send_scope(), 10).unwrap());

        clock.advance(Duration::seconds(11));
        assert!(db.claim_cooldown(send_scope(), 10).unwrap());

        // Lost claims never extended the row; won renewals still count up.
        let entry = db.get_cooldown(send_scope()).unwrap().unwrap();
        assert_eq!(entry.attempt_count, 2);
    }

    #[test]
    fn clear_and_cleanup() {
        let (_dir, db, clock) = test_db();

        db.set_cooldown(send_scope(), 30, 1).unwrap();
        assert!(db.clear_cooldown(send_scope()).unwrap());
        assert!(!db.clear_cooldown(send_scope()).unwrap());

        db.set_cooldown(send_scope(), 10, 1).unwrap();
        let ip_scoped = CooldownScope::new("login", "form").for_ip("10.0.0.5");
        db.set_cooldown(ip_scoped, 300, 1).unwrap();

        clock.advance(Duration::seconds(11));
        assert_eq!(db.cleanup_expired_cooldowns().unwrap(), 1);
        assert!(db.is_on_cooldown(ip_scoped).unwrap());
    }
}
