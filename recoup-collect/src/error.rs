//! Collection layer error types.

use recoup_domain::AdvanceId;
use std::time::Duration;
use thiserror::Error;

/// Errors from the balance refresh path.
///
/// `Clone` because an in-flight refresh result is fanned out to every
/// caller that piled onto the same single-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum BalanceError {
    /// The upstream fetch did not complete within the deadline.
    /// No automatic retry; the attempt is abandoned.
    #[error("Balance check timed out after {0:?}")]
    Timeout(Duration),

    /// The institution is temporarily not responding (retryable; maps to
    /// a 502-equivalent signal for synchronous callers).
    #[error("Institution not responding: {0}")]
    InstitutionUnavailable(String),

    /// Any other upstream-reported failure.
    #[error("Upstream balance source error: {0}")]
    Upstream(String),

    /// Unexpected internal failure (maps to a 500-equivalent signal).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BalanceError {
    /// Stable name for metric tags.
    pub fn name(&self) -> &'static str {
        match self {
            BalanceError::Timeout(_) => "balance_check_timeout",
            BalanceError::InstitutionUnavailable(_) => "institution_unavailable",
            BalanceError::Upstream(_) => "upstream_error",
            BalanceError::Internal(_) => "internal_error",
        }
    }
}

/// Dispatch to the external repayment engine failed.
#[derive(Debug, Clone, Error)]
#[error("Engine dispatch failed: {0}")]
pub struct EngineError(pub String);

/// Errors from running a collection attempt.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Balance refresh failed (already audited by the refresher)
    #[error(transparent)]
    Balance(#[from] BalanceError),

    /// Task submission to the engine failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Store error while recording the attempt
    #[error("Store error: {0}")]
    Store(#[from] recoup_store::StoreError),

    /// Domain validation error
    #[error("Domain error: {0}")]
    Domain(#[from] recoup_domain::DomainError),

    /// The advance has no outstanding balance to collect
    #[error("Advance {0} has nothing outstanding")]
    NothingOutstanding(AdvanceId),

    /// The refreshed balance cannot cover the collection amount
    #[error("Advance {advance_id}: available balance {available} below collection amount {amount}")]
    InsufficientFunds {
        advance_id: AdvanceId,
        available: rust_decimal::Decimal,
        amount: rust_decimal::Decimal,
    },
}

impl CollectError {
    /// Stable name for metric tags (the scheduled path aggregates failures
    /// by error name).
    pub fn name(&self) -> &'static str {
        match self {
            CollectError::Balance(e) => e.name(),
            CollectError::Engine(_) => "engine_dispatch_failed",
            CollectError::Store(_) => "store_error",
            CollectError::Domain(_) => "domain_error",
            CollectError::NothingOutstanding(_) => "nothing_outstanding",
            CollectError::InsufficientFunds { .. } => "insufficient_funds",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_are_stable() {
        let timeout = BalanceError::Timeout(Duration::from_secs(240));
        assert_eq!(timeout.name(), "balance_check_timeout");
        assert_eq!(CollectError::from(timeout).name(), "balance_check_timeout");

        let engine = CollectError::from(EngineError("down".to_string()));
        assert_eq!(engine.name(), "engine_dispatch_failed");
    }
}
