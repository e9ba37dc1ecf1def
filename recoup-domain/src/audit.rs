//! Audit trail records.
//!
//! Append-only: entries are created once and never updated or deleted by
//! application code. They are the compliance record for every ledger
//! mutation and every balance-refresh failure.

use crate::value_objects::{AdvanceId, PaymentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which entity an audit entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AuditSubject {
    Advance(AdvanceId),
    Payment(PaymentId),
}

/// Fixed taxonomy of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    /// A result from the repayment engine was applied (or failed to apply)
    #[serde(rename = "REPAYMENT_RESULT")]
    RepaymentResult,
    /// A balance refresh against the upstream source failed
    #[serde(rename = "BALANCE_REFRESH")]
    BalanceRefresh,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::RepaymentResult => "REPAYMENT_RESULT",
            AuditKind::BalanceRefresh => "BALANCE_REFRESH",
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    /// The advance or payment this entry is about.
    pub subject: AuditSubject,
    /// Who caused the event (caller tag, operator id, "system").
    pub actor: String,
    pub kind: AuditKind,
    pub successful: bool,
    pub message: String,
    /// Structured context: amounts, prior/new status, error detail.
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        subject: AuditSubject,
        actor: impl Into<String>,
        kind: AuditKind,
        successful: bool,
        message: impl Into<String>,
        extra: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject,
            actor: actor.into(),
            kind,
            successful,
            message: message.into(),
            extra,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_kind_tags() {
        assert_eq!(AuditKind::RepaymentResult.as_str(), "REPAYMENT_RESULT");
        assert_eq!(AuditKind::BalanceRefresh.as_str(), "BALANCE_REFRESH");
    }

    #[test]
    fn test_entry_round_trip() {
        let entry = AuditLogEntry::new(
            AuditSubject::Advance(500),
            "scheduled-auto-collection",
            AuditKind::RepaymentResult,
            true,
            "collected 75.00",
            json!({"amount": "75.00", "prior_outstanding": "75.00"}),
        );

        let serialized = serde_json::to_string(&entry).unwrap();
        let parsed: AuditLogEntry = serde_json::from_str(&serialized).unwrap();

        assert_eq!(parsed.subject, AuditSubject::Advance(500));
        assert!(parsed.successful);
        assert_eq!(parsed.extra["amount"], "75.00");
    }
}
