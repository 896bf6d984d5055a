//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the API layer as JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message ids are the SQLite autoincrement rowid.  They are monotonic, which
/// is what makes the `after_id` polling cursor work.
pub type MessageId = i64;

/// A persisted enum column held a value this version does not know.
#[derive(Debug, Error)]
#[error("unknown {field} value: {value}")]
pub struct UnknownValue {
    pub field: &'static str,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// What a message attachment is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// No attachment (text-only message).
    #[default]
    None,
    Image,
    File,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::None => "none",
            AttachmentKind::Image => "image",
            AttachmentKind::File => "file",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AttachmentKind::None),
            "image" => Ok(AttachmentKind::Image),
            "file" => Ok(AttachmentKind::File),
            other => Err(UnknownValue {
                field: "attachment_kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File or image attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Where the attachment bytes live (upload store URL).
    pub url: Option<String>,
    /// Original file name, for display.
    pub name: Option<String>,
    /// Size in bytes, if known at upload time.
    pub size_bytes: Option<i64>,
}

/// A single direct message between two users.
///
/// Immutable after creation except for `is_read` (set by the recipient) and
/// deletion (by the sender or an administrator).  There is no conversation
/// row: a conversation is the derived set of messages between an unordered
/// pair of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub recipient_id: String,
    /// Never absent: an attachment-only message stores an empty string.
    pub text: String,
    pub attachment: Attachment,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Online status of a user.
///
/// `Ord` follows the platform-wide listing convention: online sorts before
/// away, away before offline.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl FromStr for PresenceStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "away" => Ok(PresenceStatus::Away),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(UnknownValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per user; created on first heartbeat, never deleted while the
/// user exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

/// A rate-limit bucket.  Uniqueness is on the full scope key
/// `(action_type, action_identifier, user_id, ip_address)`; renewals bump
/// `attempt_count` in place instead of inserting a second row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CooldownEntry {
    pub action_type: String,
    pub action_identifier: String,
    /// Empty string when the bucket is not user-scoped.
    pub user_id: String,
    /// Empty string when the bucket is not IP-scoped.
    pub ip_address: String,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// IP blocks
// ---------------------------------------------------------------------------

/// A block-list entry.  Active iff `is_permanent`, or `expires_at` is NULL
/// or still in the future.  When `is_permanent` is set, `expires_at` is kept
/// for the audit trail but never consulted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpBlockEntry {
    pub id: i64,
    pub ip_address: String,
    pub reason: Option<String>,
    /// Moderator user id, when the block came from a human.
    pub blocked_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_permanent: bool,
    pub created_at: DateTime<Utc>,
}

impl IpBlockEntry {
    /// The active-block predicate, evaluated against a caller-supplied "now".
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.is_permanent {
            return true;
        }
        match self.expires_at {
            None => true,
            Some(expiry) => expiry > now,
        }
    }
}
