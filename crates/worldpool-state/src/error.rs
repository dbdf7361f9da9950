//! Error types for the Worldpool state store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// Stale-version save: the aggregate was modified since it was loaded.
    /// The caller must re-read and re-apply; the store never overwrites.
    #[error("concurrent modification: saved version {expected}, stored version {actual}")]
    Conflict { expected: u64, actual: u64 },
}
