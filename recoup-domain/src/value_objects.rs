//! Value objects for the Recoup domain.
//!
//! Immutable, validated domain primitives. All value objects enforce
//! invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an Advance.
///
/// Advances are keyed by the relational store's integer sequence and appear
/// as plain integers on the wire, so this is an `i64`, not a UUID.
pub type AdvanceId = i64;

/// Unique identifier for a Payment (one collection attempt).
pub type PaymentId = Uuid;

/// Unique identifier for a linked bank account.
pub type BankAccountId = i64;

/// Domain errors for value object validation and state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Amount failed validation (negative outstanding, non-positive payment)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Attempted an illegal payment status transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Minor-unit conversion
// =============================================================================

/// Convert an execution-engine minor-unit amount to a ledger amount.
///
/// The engine reports a *collection* (money moving borrower -> lender) as a
/// **negative** number of pennies; the ledger records collected amounts as
/// **positive** decimal dollars. So the conversion is sign-flip then
/// scale-divide: `ledger = (-pennies) / 100`.
///
/// Total function: every `i64` input maps to exactly one `Decimal`, and
/// `0` maps to `0` (a valid no-op outcome, not an error). Callers must not
/// apply it to disbursement-direction amounts, which use the opposite sign.
///
/// # Examples
///
/// ```
/// # use recoup_domain::ledger_amount_from_pennies;
/// # use rust_decimal_macros::dec;
/// assert_eq!(ledger_amount_from_pennies(-12345), dec!(123.45));
/// assert_eq!(ledger_amount_from_pennies(0), dec!(0));
/// ```
pub fn ledger_amount_from_pennies(pennies: i64) -> Decimal {
    // i128 negation cannot overflow for any i64 input.
    Decimal::from_i128_with_scale(-(pennies as i128), 2)
}

// =============================================================================
// OutstandingAmount
// =============================================================================

/// The amount still owed on an Advance.
///
/// # Invariants
/// - Never negative
/// - Only decreases, via [`OutstandingAmount::settle`], which clamps at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutstandingAmount(Decimal);

impl OutstandingAmount {
    /// Create a new OutstandingAmount with validation.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value < 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value < Decimal::ZERO {
            return Err(DomainError::InvalidAmount(
                "Outstanding amount must be non-negative".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// A fully repaid balance.
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Get the underlying Decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// True once the advance is fully repaid.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Apply a collected amount, clamping at zero.
    ///
    /// Returns the amount actually applied (which is less than `amount`
    /// when the collection overshoots the remaining balance). A
    /// non-positive `amount` applies nothing; the balance only decreases.
    pub fn settle(&mut self, amount: Decimal) -> Decimal {
        let applied = amount.max(Decimal::ZERO).min(self.0);
        self.0 -= applied;
        applied
    }
}

impl fmt::Display for OutstandingAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// PaymentAmount
// =============================================================================

/// The amount of one collection attempt, in ledger (major) units.
///
/// # Invariants
/// - Must be > 0, regardless of whether the attempt is debit-card or ACH
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentAmount(Decimal);

impl PaymentAmount {
    /// Create a new PaymentAmount with validation.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(
                "Payment amount must be positive".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for PaymentAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conversion_flips_sign_and_divides_scale() {
        assert_eq!(ledger_amount_from_pennies(-12345), dec!(123.45));
        assert_eq!(ledger_amount_from_pennies(-7500), dec!(75.00));
        assert_eq!(ledger_amount_from_pennies(-1), dec!(0.01));
    }

    #[test]
    fn test_conversion_zero_is_zero() {
        assert_eq!(ledger_amount_from_pennies(0), Decimal::ZERO);
    }

    #[test]
    fn test_conversion_is_total_at_extremes() {
        // No panic at the i64 boundaries.
        let min = ledger_amount_from_pennies(i64::MIN);
        let max = ledger_amount_from_pennies(i64::MAX);
        assert!(min > Decimal::ZERO);
        assert!(max < Decimal::ZERO);
    }

    #[test]
    fn test_conversion_matches_negated_division() {
        for p in [-200_000i64, -12345, -100, 0, 99, 5000] {
            let expected = Decimal::new(-p, 2);
            assert_eq!(ledger_amount_from_pennies(p), expected);
        }
    }

    #[test]
    fn test_outstanding_rejects_negative() {
        assert!(OutstandingAmount::new(dec!(-0.01)).is_err());
        assert!(OutstandingAmount::new(dec!(0)).is_ok());
    }

    #[test]
    fn test_settle_decrements() {
        let mut outstanding = OutstandingAmount::new(dec!(75.00)).unwrap();
        let applied = outstanding.settle(dec!(20.00));

        assert_eq!(applied, dec!(20.00));
        assert_eq!(outstanding.as_decimal(), dec!(55.00));
    }

    #[test]
    fn test_settle_clamps_at_zero() {
        let mut outstanding = OutstandingAmount::new(dec!(10.00)).unwrap();
        let applied = outstanding.settle(dec!(25.00));

        assert_eq!(applied, dec!(10.00));
        assert!(outstanding.is_zero());
    }

    #[test]
    fn test_settle_sequence_never_goes_negative() {
        let mut outstanding = OutstandingAmount::new(dec!(30.00)).unwrap();
        for _ in 0..5 {
            outstanding.settle(dec!(12.50));
            assert!(outstanding.as_decimal() >= Decimal::ZERO);
        }
        assert!(outstanding.is_zero());
    }

    #[test]
    fn test_settle_ignores_non_positive_amounts() {
        let mut outstanding = OutstandingAmount::new(dec!(30.00)).unwrap();
        assert_eq!(outstanding.settle(dec!(-5.00)), Decimal::ZERO);
        assert_eq!(outstanding.settle(Decimal::ZERO), Decimal::ZERO);
        assert_eq!(outstanding.as_decimal(), dec!(30.00));
    }

    #[test]
    fn test_payment_amount_must_be_positive() {
        assert!(PaymentAmount::new(dec!(0)).is_err());
        assert!(PaymentAmount::new(dec!(-5)).is_err());
        assert_eq!(PaymentAmount::new(dec!(75)).unwrap().as_decimal(), dec!(75));
    }
}
