//! Repository trait definitions (ports)
//!
//! These traits define the storage interface for the collection pipeline.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use recoup_domain::{AdvanceId, AuditLogEntry, AuditSubject, Advance, Payment, PaymentId};

/// Repository for Advance entities
#[async_trait]
pub trait AdvanceRepository: Send + Sync {
    /// Save an advance (insert or update)
    async fn save(&self, advance: &Advance) -> Result<(), StoreError>;

    /// Find an advance by ID, with its bank account, instrument, and
    /// schedule loaded
    async fn find_by_id(&self, id: AdvanceId) -> Result<Option<Advance>, StoreError>;

    /// Find advances that still carry an outstanding balance
    async fn find_unsettled(&self) -> Result<Vec<Advance>, StoreError>;
}

/// Repository for Payment entities
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Save a payment (insert or update)
    async fn save(&self, payment: &Payment) -> Result<(), StoreError>;

    /// Find a payment by ID (the collection attempt correlation id)
    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    /// Find all payments recorded for an advance
    async fn find_by_advance(&self, advance_id: AdvanceId) -> Result<Vec<Payment>, StoreError>;
}

/// Repository for audit log entries (append-only)
///
/// There is intentionally no update or delete: entries are immutable once
/// written.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// Append an entry to the trail
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;

    /// Load entries about a given advance or payment (in append order)
    async fn find_by_subject(&self, subject: AuditSubject)
        -> Result<Vec<AuditLogEntry>, StoreError>;
}

/// Combined store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Get advance repository
    fn advances(&self) -> &dyn AdvanceRepository;

    /// Get payment repository
    fn payments(&self) -> &dyn PaymentRepository;

    /// Get audit log repository
    fn audit_log(&self) -> &dyn AuditLogRepository;
}
