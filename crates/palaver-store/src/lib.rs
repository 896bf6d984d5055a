//! # palaver-store
//!
//! Relational storage for the stateful core of the Palaver platform:
//! direct-message delivery, presence tracking, and abuse mitigation
//! (cooldowns and IP blocks).
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed operation groups, one module
//! per component:
//!
//! - [`messages`] -- message creation, duplicate suppression, conversation
//!   retrieval, unread accounting.
//! - [`presence`] -- per-user online/away/offline status with heartbeat
//!   upserts and idle sweeps.
//! - [`cooldowns`] -- a generic rate limiter keyed by
//!   `(action_type, action_identifier, user, ip)`.
//! - [`ip_blocks`] -- permanent or time-limited IP block list.
//!
//! All expiry comparisons go through the injectable [`Clock`] held by the
//! `Database`, so tests can pin or advance time deterministically.

pub mod clock;
pub mod cooldowns;
pub mod database;
pub mod ip_blocks;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;

mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldowns::CooldownScope;
pub use database::Database;
pub use error::StoreError;
pub use models::*;
