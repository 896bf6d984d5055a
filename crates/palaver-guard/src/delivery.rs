//! The full "send message" flow: gates, duplicate absorption, creation,
//! presence heartbeat.
//!
//! Order matters: the dedup probe runs before the burst cooldown is claimed,
//! so a client retry of an identical message is answered with the original
//! id instead of a rate-limit refusal.

use palaver_store::{Attachment, CooldownScope, Database, Message, MessageId, PresenceStatus};
use serde::Serialize;

use crate::config::PolicyConfig;
use crate::error::{GateError, Result};

/// Action type under which message bursts are rate limited.
const SEND_ACTION: &str = "message_send";
/// Identifier within the action type; direct messages share one bucket per
/// sender.
const SEND_IDENTIFIER: &str = "dm";

/// What happened to a send request.  Every variant is a normal outcome the
/// UI renders differently; none of them is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    /// Stored and visible to the recipient.
    Delivered(Message),
    /// An identical message inside the dedup window already exists; its id
    /// is returned so the client converges on one visible message.
    Duplicate(MessageId),
    /// The sender's IP carries an active block.
    Blocked,
    /// The sender is inside the burst cooldown.
    RateLimited { retry_after_secs: i64 },
}

/// Orchestrates message delivery against one store handle.
pub struct DeliveryService<'a> {
    db: &'a Database,
    policy: PolicyConfig,
}

impl<'a> DeliveryService<'a> {
    pub fn new(db: &'a Database, policy: PolicyConfig) -> Self {
        Self { db, policy }
    }

    /// Deliver one direct message.
    ///
    /// Flow: block list, duplicate absorption, atomic burst-cooldown claim,
    /// creation, presence heartbeat.  The claim is atomic because creation
    /// is irreversible: a check-then-set pair here would let concurrent
    /// requests slip an extra message through.
    pub fn send(
        &self,
        sender_id: &str,
        recipient_id: &str,
        text: Option<&str>,
        attachment: Option<&Attachment>,
        ip: &str,
    ) -> Result<SendOutcome> {
        // Validated up front so an invalid request never burns the sender's
        // cooldown window; the store re-checks as a backstop.
        if sender_id == recipient_id {
            return Err(GateError::InvalidRequest(
                "cannot send a message to yourself".to_string(),
            ));
        }

        if self.db.is_ip_blocked(ip)? {
            tracing::warn!(ip, sender = sender_id, "send refused: blocked IP");
            return Ok(SendOutcome::Blocked);
        }

        // Absorb client retry storms before the cooldown can reject them.
        let attachment_url = attachment.and_then(|a| a.url.as_deref());
        if let Some(existing) = self.db.find_recent_duplicate(
            sender_id,
            recipient_id,
            text,
            attachment_url,
            self.policy.dedup_window_secs,
        )? {
            tracing::debug!(sender = sender_id, message_id = existing, "duplicate absorbed");
            self.db.touch_presence(sender_id, PresenceStatus::Online)?;
            return Ok(SendOutcome::Duplicate(existing));
        }

        let scope = CooldownScope::new(SEND_ACTION, SEND_IDENTIFIER).for_user(sender_id);
        if !self.db.claim_cooldown(scope, self.policy.message_cooldown_secs)? {
            let retry_after_secs = self.db.cooldown_remaining_secs(scope)?;
            return Ok(SendOutcome::RateLimited { retry_after_secs });
        }

        let message = self
            .db
            .create_message(sender_id, recipient_id, text, attachment)?;
        self.db.touch_presence(sender_id, PresenceStatus::Online)?;

        Ok(SendOutcome::Delivered(message))
    }
}
