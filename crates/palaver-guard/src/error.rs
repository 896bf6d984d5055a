use thiserror::Error;

use palaver_store::StoreError;

/// Errors crossing the guard boundary.
///
/// Domain-level outcomes ("blocked", "rate limited") are not errors here --
/// they are [`crate::GateDecision`] / [`crate::SendOutcome`] variants, so the
/// calling UI can render each one differently.  This enum is for actual
/// failures.
#[derive(Debug, Error)]
pub enum GateError {
    /// The request is malformed at the domain level.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The store failed underneath us.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for GateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidRequest(msg) => GateError::InvalidRequest(msg),
            other => GateError::Store(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GateError>;
