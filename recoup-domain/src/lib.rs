//! Domain model for the Recoup collection pipeline.
//!
//! Pure types only: validated value objects, the Advance/Payment ledger
//! entities, audit-trail records, and the inbound message shapes consumed
//! by the daemon. No I/O lives here.

pub mod audit;
pub mod entities;
pub mod messages;
pub mod value_objects;

pub use audit::{AuditKind, AuditLogEntry, AuditSubject};
pub use entities::{
    Advance, BankAccount, CollectionAttemptContext, CollectionSchedule, DisbursementStatus,
    Finalize, Payment, PaymentInstrument, PaymentStatus,
};
pub use messages::{
    AdvanceDueForCollection, AdvanceTask, RepaymentTask, RepaymentTaskCompleted,
    TaskPaymentMethod, TaskPaymentResult, TaskResultStatus,
};
pub use value_objects::{
    ledger_amount_from_pennies, AdvanceId, BankAccountId, DomainError, OutstandingAmount,
    PaymentAmount, PaymentId,
};
