//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::{AdvanceRepository, AuditLogRepository, PaymentRepository, Store};
use async_trait::async_trait;
use recoup_domain::{AdvanceId, Advance, AuditLogEntry, AuditSubject, Payment, PaymentId};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory store for testing
pub struct MemoryStore {
    advances: RwLock<HashMap<AdvanceId, Advance>>,
    payments: RwLock<HashMap<PaymentId, Payment>>,
    audit_entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            advances: RwLock::new(HashMap::new()),
            payments: RwLock::new(HashMap::new()),
            audit_entries: RwLock::new(Vec::new()),
        }
    }

    /// Get the number of advances
    pub fn advance_count(&self) -> usize {
        self.advances.read().unwrap().len()
    }

    /// Get the number of payments
    pub fn payment_count(&self) -> usize {
        self.payments.read().unwrap().len()
    }

    /// Get the number of audit entries
    pub fn audit_count(&self) -> usize {
        self.audit_entries.read().unwrap().len()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        self.advances.write().unwrap().clear();
        self.payments.write().unwrap().clear();
        self.audit_entries.write().unwrap().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdvanceRepository for MemoryStore {
    async fn save(&self, advance: &Advance) -> Result<(), StoreError> {
        self.advances
            .write()
            .unwrap()
            .insert(advance.id, advance.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AdvanceId) -> Result<Option<Advance>, StoreError> {
        Ok(self.advances.read().unwrap().get(&id).cloned())
    }

    async fn find_unsettled(&self) -> Result<Vec<Advance>, StoreError> {
        let advances = self.advances.read().unwrap();
        let mut unsettled: Vec<Advance> =
            advances.values().filter(|a| !a.is_settled()).cloned().collect();
        unsettled.sort_by_key(|a| a.id);
        Ok(unsettled)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn save(&self, payment: &Payment) -> Result<(), StoreError> {
        self.payments
            .write()
            .unwrap()
            .insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.read().unwrap().get(&id).cloned())
    }

    async fn find_by_advance(&self, advance_id: AdvanceId) -> Result<Vec<Payment>, StoreError> {
        let payments = self.payments.read().unwrap();
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| p.advance_id == advance_id)
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.created_at);
        Ok(matching)
    }
}

#[async_trait]
impl AuditLogRepository for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.audit_entries.write().unwrap().push(entry.clone());
        Ok(())
    }

    async fn find_by_subject(
        &self,
        subject: AuditSubject,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let entries = self.audit_entries.read().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn advances(&self) -> &dyn AdvanceRepository {
        self
    }

    fn payments(&self) -> &dyn PaymentRepository {
        self
    }

    fn audit_log(&self) -> &dyn AuditLogRepository {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoup_domain::{
        AuditKind, BankAccount, OutstandingAmount, PaymentAmount, PaymentStatus,
    };
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn test_advance(id: AdvanceId, outstanding: rust_decimal::Decimal) -> Advance {
        Advance::new(
            id,
            OutstandingAmount::new(outstanding).unwrap(),
            BankAccount {
                id: 42,
                institution: "First Test Bank".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_advance_save_and_find() {
        let store = MemoryStore::new();
        let advance = test_advance(500, dec!(75.00));

        store.advances().save(&advance).await.unwrap();

        let found = store.advances().find_by_id(500).await.unwrap().unwrap();
        assert_eq!(found.outstanding.as_decimal(), dec!(75.00));

        assert!(store.advances().find_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_unsettled_excludes_settled() {
        let store = MemoryStore::new();
        store.advances().save(&test_advance(1, dec!(50))).await.unwrap();
        store.advances().save(&test_advance(2, dec!(0))).await.unwrap();
        store.advances().save(&test_advance(3, dec!(10))).await.unwrap();

        let unsettled = store.advances().find_unsettled().await.unwrap();
        let ids: Vec<AdvanceId> = unsettled.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_payment_save_update_and_find_by_advance() {
        let store = MemoryStore::new();
        let mut payment = Payment::new(500, PaymentAmount::new(dec!(75.00)).unwrap());

        store.payments().save(&payment).await.unwrap();
        payment.finalize(PaymentStatus::Completed).unwrap();
        store.payments().save(&payment).await.unwrap();

        // Update, not duplicate
        assert_eq!(store.payment_count(), 1);

        let found = store.payments().find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(found.status, PaymentStatus::Completed);

        let by_advance = store.payments().find_by_advance(500).await.unwrap();
        assert_eq!(by_advance.len(), 1);
        assert!(store.payments().find_by_advance(999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audit_append_and_filter_by_subject() {
        let store = MemoryStore::new();

        let about_advance = AuditLogEntry::new(
            AuditSubject::Advance(500),
            "system",
            AuditKind::BalanceRefresh,
            false,
            "upstream timeout",
            json!({"bank_account_id": 42}),
        );
        let about_other = AuditLogEntry::new(
            AuditSubject::Advance(999),
            "system",
            AuditKind::RepaymentResult,
            true,
            "collected",
            json!({}),
        );

        store.audit_log().append(&about_advance).await.unwrap();
        store.audit_log().append(&about_other).await.unwrap();

        let entries = store
            .audit_log()
            .find_by_subject(AuditSubject::Advance(500))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].successful);
        assert_eq!(store.audit_count(), 2);
    }
}
