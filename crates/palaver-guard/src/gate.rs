//! The cross-cutting gate run before any mutating action:
//! block list first, then the rate limiter.

use palaver_store::{CooldownScope, Database};
use serde::Serialize;

use crate::error::Result;

/// Outcome of a gate check, in evaluation order.  `Blocked` and
/// `RateLimited` are distinct so the caller can render "you're blocked"
/// and "try again in N seconds" differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    Blocked,
    RateLimited { retry_after_secs: i64 },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Sequences the block-list and cooldown checks against one store handle.
///
/// The gate only reads; recording a violation (`set_cooldown`) or claiming
/// a window stays with the caller, which knows the action's cost.
pub struct RequestGate<'a> {
    db: &'a Database,
}

impl<'a> RequestGate<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Check the gates for one inbound action.  Block list wins over the
    /// rate limiter when both apply.
    pub fn check(&self, ip: &str, scope: CooldownScope<'_>) -> Result<GateDecision> {
        if self.db.is_ip_blocked(ip)? {
            tracing::warn!(ip, "request from blocked IP refused");
            return Ok(GateDecision::Blocked);
        }

        if self.db.is_on_cooldown(scope)? {
            let retry_after_secs = self.db.cooldown_remaining_secs(scope)?;
            tracing::warn!(
                ip,
                action = scope.action_type,
                retry_after_secs,
                "rate limited"
            );
            return Ok(GateDecision::RateLimited { retry_after_secs });
        }

        Ok(GateDecision::Allow)
    }
}
