//! Domain error types.

use thiserror::Error;

use crate::types::ResourceType;

/// Result type alias for aggregate operations.
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Errors raised by the pool and world aggregates.
///
/// These are surfaced synchronously to the caller and never retried inside
/// the core; the caller decides whether to adjust and resubmit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuotaError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("insufficient {resource}: requested {requested}, available {available}")]
    InsufficientResource {
        resource: ResourceType,
        requested: f64,
        available: f64,
    },
}

/// Reject negative or non-finite quantities before they enter a ledger.
pub(crate) fn ensure_amount(what: &str, amount: f64) -> QuotaResult<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(QuotaError::InvalidConfiguration(format!(
            "{what} must be a non-negative finite number, got {amount}"
        )));
    }
    Ok(())
}

/// Reject percentages outside `[0, 100]`.
pub(crate) fn ensure_percent(what: &str, percent: f64) -> QuotaResult<()> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(QuotaError::InvalidConfiguration(format!(
            "{what} must be within 0..=100, got {percent}"
        )));
    }
    Ok(())
}
