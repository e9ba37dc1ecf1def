//! Port definitions for collection-time collaborators.
//!
//! Adapters implement these ports for specific services (a banking data
//! provider, the production repayment engine); stubs implement them for
//! tests. The concrete integrations are out of this core's scope.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_domain::{AdvanceId, BankAccount, BankAccountId, PaymentId, PaymentInstrument};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, EngineError};

// =============================================================================
// Balance source port
// =============================================================================

/// A borrower's bank balance as reported by the upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub bank_account_id: BankAccountId,
    /// Funds available for withdrawal now.
    pub available: Decimal,
    /// Posted balance (may exceed available).
    pub current: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Why and for whom a balance is being fetched; forwarded upstream for
/// provider-side audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    pub advance_id: AdvanceId,
    pub caller: String,
    pub reason: String,
}

/// Port for the upstream balance-fetch collaborator.
///
/// Implementations:
/// - `StubBalanceSource` - for testing (configurable latency and failures)
/// - a banking-data-provider adapter in production (out of scope)
#[async_trait]
pub trait BalanceSourcePort: Send + Sync {
    /// Fetch a fresh balance for the account.
    ///
    /// Callers never invoke this directly during collection; the
    /// [`crate::BalanceRefresher`] wraps it with the single-flight lock,
    /// deadline, and cache.
    async fn fetch_balance(
        &self,
        bank_account: &BankAccount,
        ctx: &FetchContext,
    ) -> Result<BalanceSnapshot, BalanceError>;
}

// =============================================================================
// Repayment engine port
// =============================================================================

/// One collection task submitted to the external repayment engine.
///
/// `attempt_id` is the speculative payment's id; the engine echoes it back
/// in every sub-result so reconciliation can key its ledger mutation on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionTask {
    pub attempt_id: PaymentId,
    pub advance_id: AdvanceId,
    pub instrument: PaymentInstrument,
    pub amount: Decimal,
}

/// Port for the external repayment-execution engine.
///
/// Dispatch is fire-and-forget: a successful return means the engine
/// accepted the task, nothing more. Outcomes arrive later as
/// `RepaymentTaskCompleted` messages.
#[async_trait]
pub trait RepaymentEnginePort: Send + Sync {
    async fn dispatch(&self, task: &CollectionTask) -> Result<(), EngineError>;
}
