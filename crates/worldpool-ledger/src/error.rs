//! Ledger error types.

use thiserror::Error;

use worldpool_core::QuotaError;
use worldpool_state::StateError;

/// Errors that can occur while coordinating pool and world records.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("resource pool not found for owner: {0}")]
    PoolNotFound(String),

    #[error("resource pool already exists for owner: {0}")]
    PoolExists(String),

    #[error("world record not found: {0}")]
    WorldNotFound(String),

    #[error("world record already exists: {0}")]
    WorldExists(String),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// Includes `StateError::Conflict` for stale-version saves; the
    /// orchestration layer retries with a fresh read-modify-write cycle.
    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
