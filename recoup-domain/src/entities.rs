//! Domain entities for Recoup.
//!
//! The ledger side of the pipeline: Advance (a disbursed loan), Payment
//! (one collection attempt, created speculatively at dispatch and finalized
//! by reconciliation), and the supporting account/schedule records.

use crate::value_objects::{
    AdvanceId, BankAccountId, DomainError, OutstandingAmount, PaymentAmount, PaymentId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Supporting records
// =============================================================================

/// Disbursement lifecycle tag. Created once; never mutated by the
/// collection pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisbursementStatus {
    Pending,
    Disbursed,
}

/// The payment rail a collection attempt rides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentInstrument {
    DebitCard,
    Ach,
}

/// A borrower's linked bank account (balance source target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: BankAccountId,
    /// Institution display name, for audit context.
    pub institution: String,
}

/// Active collection schedule for an advance. At most one per advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchedule {
    /// The partial amount collected per scheduled cycle.
    pub scheduled_amount: Decimal,
}

/// Ephemeral context for one collection attempt. Not persisted beyond the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionAttemptContext {
    /// Who triggered this attempt (scheduler, operator, ...).
    pub caller: String,
    /// Human-readable name for log lines and audit entries.
    pub log_name: String,
    /// Collect the entire remaining balance rather than the scheduled amount.
    pub retrieve_full_outstanding: bool,
}

impl CollectionAttemptContext {
    /// Context for a scheduled auto-collection.
    pub fn scheduled() -> Self {
        Self {
            caller: "scheduled-auto-collection".to_string(),
            log_name: "scheduled collection".to_string(),
            retrieve_full_outstanding: true,
        }
    }

    /// Context for an operator-triggered attempt.
    pub fn manual(operator: impl Into<String>) -> Self {
        Self {
            caller: operator.into(),
            log_name: "manual collection".to_string(),
            retrieve_full_outstanding: false,
        }
    }
}

// =============================================================================
// Advance
// =============================================================================

/// A disbursed short-term loan.
///
/// `outstanding` only ever decreases toward zero, and only through
/// [`Advance::settle`], which is reached exclusively from the
/// reconciliation step or an audited manual override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advance {
    pub id: AdvanceId,
    pub outstanding: OutstandingAmount,
    pub disbursement_status: DisbursementStatus,
    pub bank_account: BankAccount,
    pub instrument: PaymentInstrument,
    pub schedule: Option<CollectionSchedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Advance {
    /// Create a disbursed advance with an outstanding balance.
    pub fn new(id: AdvanceId, outstanding: OutstandingAmount, bank_account: BankAccount) -> Self {
        let now = Utc::now();
        Self {
            id,
            outstanding,
            disbursement_status: DisbursementStatus::Disbursed,
            bank_account,
            instrument: PaymentInstrument::Ach,
            schedule: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once there is nothing left to collect.
    pub fn is_settled(&self) -> bool {
        self.outstanding.is_zero()
    }

    /// Apply a collected amount to the balance, clamping at zero.
    ///
    /// Returns the amount actually applied.
    pub fn settle(&mut self, amount: Decimal) -> Decimal {
        let applied = self.outstanding.settle(amount);
        self.updated_at = Utc::now();
        applied
    }

    /// The amount a collection attempt should target: the full remaining
    /// balance, or the scheduled partial amount capped by what is owed.
    pub fn collection_amount(&self, retrieve_full_outstanding: bool) -> Decimal {
        let outstanding = self.outstanding.as_decimal();
        match (&self.schedule, retrieve_full_outstanding) {
            (Some(schedule), false) => schedule.scheduled_amount.min(outstanding),
            _ => outstanding,
        }
    }
}

// =============================================================================
// Payment state machine
// =============================================================================

/// Lifecycle of one collection attempt.
///
/// `Pending` is the only non-terminal state. The terminal states are
/// absorbing: once reached, no further transition is applied. This is the
/// ledger's idempotency anchor for redelivered engine results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Dispatched to the engine, no terminal result yet
    Pending,
    /// Engine collected the money
    Completed,
    /// Engine reported a business failure (e.g. insufficient funds)
    Failed,
    /// Engine-side error; treated identically to Failed for ledger purposes
    Errored,
    /// Attempt withdrawn before the engine ran it
    Canceled,
}

impl PaymentStatus {
    /// True for every state except `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Stable name for logs and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Errored => "errored",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

/// Outcome of a finalize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// The transition was applied.
    Applied,
    /// The payment was already terminal; nothing changed.
    AlreadyTerminal,
}

/// One collection attempt's ledger entry.
///
/// Created speculatively (status `Pending`) when collection is dispatched;
/// finalized when the engine's result arrives. The payment id doubles as
/// the collection attempt's correlation id on the engine wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub advance_id: AdvanceId,
    pub amount: PaymentAmount,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Create a speculative pending payment for a dispatched attempt.
    pub fn new(advance_id: AdvanceId, amount: PaymentAmount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            advance_id,
            amount,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    /// Move the payment to a terminal status.
    ///
    /// Idempotent: a payment that is already terminal is left untouched and
    /// `Finalize::AlreadyTerminal` is returned, so re-applying the same
    /// engine result is a no-op.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStateTransition` if `status` is not a
    /// terminal status.
    pub fn finalize(&mut self, status: PaymentStatus) -> Result<Finalize, DomainError> {
        if !status.is_terminal() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot finalize payment {} to non-terminal status {:?}",
                self.id, status
            )));
        }

        if self.status.is_terminal() {
            return Ok(Finalize::AlreadyTerminal);
        }

        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.finalized_at = Some(now);
        Ok(Finalize::Applied)
    }

    /// Withdraw a speculative attempt that never reached the engine.
    pub fn cancel(&mut self) -> Result<Finalize, DomainError> {
        self.finalize(PaymentStatus::Canceled)
    }
}

// =============================================================================
// Tests
// =============================================================================
