//! # palaver-guard
//!
//! Request gating for the Palaver platform, applied ahead of every mutating
//! endpoint: client-IP resolution from proxy headers, the block-then-cooldown
//! gate, and the message-delivery flow that ties the gates to the store.
//!
//! The crate is transport-agnostic: it consumes an [`http::HeaderMap`] and an
//! already-authenticated user id, and never touches routing or sessions.

pub mod client_ip;
pub mod config;
pub mod delivery;
pub mod gate;

mod error;

pub use client_ip::resolve_client_ip;
pub use config::PolicyConfig;
pub use delivery::{DeliveryService, SendOutcome};
pub use error::GateError;
pub use gate::{GateDecision, RequestGate};
