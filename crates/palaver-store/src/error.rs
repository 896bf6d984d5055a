use thiserror::Error;

/// Errors produced by the store layer.
///
/// Validation failures ([`StoreError::InvalidRequest`]) are raised before any
/// store mutation and are a distinct kind from infrastructure failures
/// ([`StoreError::Sqlite`]), so callers can map them to different user-visible
/// outcomes.  Absent rows are not errors at all: lookups return `Option` and
/// mutations report `false` when nothing changed.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The request is malformed at the domain level (e.g. a self-targeted
    /// message). Never the result of store state.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
