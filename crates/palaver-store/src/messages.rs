//! Message creation, duplicate suppression, conversation retrieval, and
//! unread accounting.
//!
//! Duplicate suppression ([`Database::find_recent_duplicate`]) is a
//! check-then-act pattern and is not race-free on its own: two concurrent
//! identical requests can both pass the check before either inserts.  That is
//! accepted -- the window exists to absorb client retry storms, not to act as
//! a uniqueness constraint.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, AttachmentKind, Message, MessageId};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new message and return the fully populated row.
    ///
    /// Absent text is normalized to an empty string and an absent attachment
    /// to kind `none`, so a message is always displayable content.  A
    /// self-targeted message is rejected before any store write.
    pub fn create_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        text: Option<&str>,
        attachment: Option<&Attachment>,
    ) -> Result<Message> {
        if sender_id == recipient_id {
            return Err(StoreError::InvalidRequest(
                "cannot send a message to yourself".to_string(),
            ));
        }

        let text = text.unwrap_or("");
        let attachment = attachment.cloned().unwrap_or_default();
        let now = self.now();

        self.conn().execute(
            "INSERT INTO messages
                 (sender_id, recipient_id, text, attachment_kind, attachment_url,
                  attachment_name, attachment_size, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                sender_id,
                recipient_id,
                text,
                attachment.kind.as_str(),
                attachment.url,
                attachment.name,
                attachment.size_bytes,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Message {
            id: self.conn().last_insert_rowid(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            attachment,
            is_read: false,
            created_at: now,
        })
    }

    /// Find an identical message from `sender_id` to `recipient_id` created
    /// within the trailing `window_secs`, newest first.
    ///
    /// Callers use this before [`Database::create_message`] to absorb
    /// double-submits; under concurrent identical requests one duplicate may
    /// still slip through (see the module docs).
    pub fn find_recent_duplicate(
        &self,
        sender_id: &str,
        recipient_id: &str,
        text: Option<&str>,
        attachment_url: Option<&str>,
        window_secs: i64,
    ) -> Result<Option<MessageId>> {
        let cutoff = self.now() - Duration::seconds(window_secs);

        let id = self
            .conn()
            .query_row(
                "SELECT id FROM messages
                 WHERE sender_id = ?1
                   AND recipient_id = ?2
                   AND text = ?3
                   AND COALESCE(attachment_url, '') = ?4
                   AND created_at >= ?5
                 ORDER BY id DESC
                 LIMIT 1",
                params![
                    sender_id,
                    recipient_id,
                    text.unwrap_or(""),
                    attachment_url.unwrap_or(""),
                    cutoff.to_rfc3339(),
                ],
                |row| row.get::<_, i64>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch one page of the conversation between two users, both directions
    /// of the pair.
    ///
    /// Rows are fetched newest-first so pagination walks backwards from the
    /// most recent, then reversed: within the returned page the order is
    /// oldest-first, ready for display.
    pub fn get_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, text, attachment_kind, attachment_url,
                    attachment_name, attachment_size, is_read, created_at
             FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(params![user_a, user_b, limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Messages addressed to `recipient_id`, ascending by id.
    ///
    /// `after_id` is a client-supplied cursor: only rows with a greater id
    /// are returned.  This is a polling contract, not a push subscription.
    pub fn get_new_messages(
        &self,
        recipient_id: &str,
        after_id: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, text, attachment_kind, attachment_url,
                    attachment_name, attachment_size, is_read, created_at
             FROM messages
             WHERE recipient_id = ?1 AND id > ?2
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![recipient_id, after_id.unwrap_or(0)], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Read state
    // ------------------------------------------------------------------

    /// Mark one message as read.  Returns `false` when nothing changed: the
    /// message does not exist, belongs to someone else, or was already read.
    /// Those are expected under concurrency (two tabs racing), not errors.
    pub fn mark_as_read(&self, id: MessageId, recipient_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1
             WHERE id = ?1 AND recipient_id = ?2 AND is_read = 0",
            params![id, recipient_id],
        )?;
        Ok(affected > 0)
    }

    /// Mark every unread message from `other_id` to `reader_id` as read.
    /// Returns how many rows changed.
    pub fn mark_conversation_as_read(&self, reader_id: &str, other_id: &str) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1
             WHERE recipient_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![reader_id, other_id],
        )?;
        Ok(affected)
    }

    /// Total unread messages addressed to `user_id`.
    pub fn unread_count(&self, user_id: &str) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Unread counts grouped by sender, for per-conversation badges.
    pub fn unread_counts_by_sender(&self, user_id: &str) -> Result<HashMap<String, i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*) FROM messages
             WHERE recipient_id = ?1 AND is_read = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }

    /// Number of distinct conversations with at least one unread message.
    pub fn unread_conversations_count(&self, user_id: &str) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(DISTINCT sender_id) FROM messages
             WHERE recipient_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a message.  Succeeds if `actor_id` is the sender or `is_admin`
    /// is set; otherwise a no-op returning `false`.  Whether the actor really
    /// is an administrator is the caller's responsibility -- the store only
    /// encodes the predicate.
    pub fn delete_message(&self, id: MessageId, actor_id: &str, is_admin: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1 AND (sender_id = ?2 OR ?3)",
            params![id, actor_id, is_admin],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(4)?;
    let kind: AttachmentKind = kind_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let ts_str: String = row.get(9)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        text: row.get(3)?,
        attachment: Attachment {
            kind,
            url: row.get(5)?,
            name: row.get(6)?,
            size_bytes: row.get(7)?,
        },
        is_read: row.get(8)?,
        created_at,
    })
}
