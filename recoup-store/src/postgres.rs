//! PostgreSQL store implementation.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.
//! The schema below is provisioned out of band; this crate assumes it
//! already exists.
//!
//! # Schema
//!
//! ```text
//! advances(id BIGINT PK, outstanding NUMERIC, disbursement_status TEXT,
//!          bank_account_id BIGINT, institution TEXT, instrument TEXT,
//!          scheduled_amount NUMERIC NULL, created_at, updated_at)
//! payments(id UUID PK, advance_id BIGINT, amount NUMERIC, status TEXT,
//!          created_at, updated_at, finalized_at NULL)
//! audit_log(id UUID PK, subject_kind TEXT, subject_id TEXT, actor TEXT,
//!           kind TEXT, successful BOOL, message TEXT, extra JSONB,
//!           created_at)  -- append-only, no UPDATE/DELETE issued
//! ```

use crate::error::StoreError;
use crate::repository::{AdvanceRepository, AuditLogRepository, PaymentRepository, Store};
use async_trait::async_trait;
use recoup_domain::{
    AdvanceId, Advance, AuditKind, AuditLogEntry, AuditSubject, BankAccount, CollectionSchedule,
    DisbursementStatus, OutstandingAmount, Payment, PaymentAmount, PaymentId, PaymentInstrument,
    PaymentStatus,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_advance_row(row: &PgRow) -> Result<Advance, StoreError> {
    let outstanding: Decimal = row.try_get("outstanding").map_err(db)?;
    let scheduled_amount: Option<Decimal> = row.try_get("scheduled_amount").ok().flatten();

    Ok(Advance {
        id: row.try_get("id").map_err(db)?,
        outstanding: OutstandingAmount::new(outstanding)?,
        disbursement_status: parse_disbursement(row.try_get::<String, _>("disbursement_status").map_err(db)?.as_str())?,
        bank_account: BankAccount {
            id: row.try_get("bank_account_id").map_err(db)?,
            institution: row.try_get("institution").map_err(db)?,
        },
        instrument: parse_instrument(row.try_get::<String, _>("instrument").map_err(db)?.as_str())?,
        schedule: scheduled_amount.map(|scheduled_amount| CollectionSchedule { scheduled_amount }),
        created_at: row.try_get("created_at").map_err(db)?,
        updated_at: row.try_get("updated_at").map_err(db)?,
    })
}

fn parse_payment_row(row: &PgRow) -> Result<Payment, StoreError> {
    let amount: Decimal = row.try_get("amount").map_err(db)?;

    Ok(Payment {
        id: row.try_get("id").map_err(db)?,
        advance_id: row.try_get("advance_id").map_err(db)?,
        amount: PaymentAmount::new(amount)?,
        status: parse_status(row.try_get::<String, _>("status").map_err(db)?.as_str())?,
        created_at: row.try_get("created_at").map_err(db)?,
        updated_at: row.try_get("updated_at").map_err(db)?,
        finalized_at: row.try_get("finalized_at").ok().flatten(),
    })
}

fn db(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn parse_disbursement(s: &str) -> Result<DisbursementStatus, StoreError> {
    match s {
        "pending" => Ok(DisbursementStatus::Pending),
        "disbursed" => Ok(DisbursementStatus::Disbursed),
        other => Err(StoreError::Serialization(format!(
            "Unknown disbursement status: {other}"
        ))),
    }
}

fn parse_instrument(s: &str) -> Result<PaymentInstrument, StoreError> {
    match s {
        "debit_card" => Ok(PaymentInstrument::DebitCard),
        "ach" => Ok(PaymentInstrument::Ach),
        other => Err(StoreError::Serialization(format!(
            "Unknown payment instrument: {other}"
        ))),
    }
}

fn parse_status(s: &str) -> Result<PaymentStatus, StoreError> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        "errored" => Ok(PaymentStatus::Errored),
        "canceled" => Ok(PaymentStatus::Canceled),
        other => Err(StoreError::Serialization(format!(
            "Unknown payment status: {other}"
        ))),
    }
}

fn disbursement_str(status: DisbursementStatus) -> &'static str {
    match status {
        DisbursementStatus::Pending => "pending",
        DisbursementStatus::Disbursed => "disbursed",
    }
}

fn instrument_str(instrument: PaymentInstrument) -> &'static str {
    match instrument {
        PaymentInstrument::DebitCard => "debit_card",
        PaymentInstrument::Ach => "ach",
    }
}

fn status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
        PaymentStatus::Errored => "errored",
        PaymentStatus::Canceled => "canceled",
    }
}

fn subject_columns(subject: AuditSubject) -> (&'static str, String) {
    match subject {
        AuditSubject::Advance(id) => ("advance", id.to_string()),
        AuditSubject::Payment(id) => ("payment", id.to_string()),
    }
}

#[async_trait]
impl AdvanceRepository for PgStore {
    async fn save(&self, advance: &Advance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO advances
                (id, outstanding, disbursement_status, bank_account_id,
                 institution, instrument, scheduled_amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                outstanding = EXCLUDED.outstanding,
                scheduled_amount = EXCLUDED.scheduled_amount,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(advance.id)
        .bind(advance.outstanding.as_decimal())
        .bind(disbursement_str(advance.disbursement_status))
        .bind(advance.bank_account.id)
        .bind(&advance.bank_account.institution)
        .bind(instrument_str(advance.instrument))
        .bind(advance.schedule.map(|s| s.scheduled_amount))
        .bind(advance.created_at)
        .bind(advance.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: AdvanceId) -> Result<Option<Advance>, StoreError> {
        let row = sqlx::query("SELECT * FROM advances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_advance_row).transpose()
    }

    async fn find_unsettled(&self) -> Result<Vec<Advance>, StoreError> {
        let rows = sqlx::query("SELECT * FROM advances WHERE outstanding > 0 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(parse_advance_row).collect()
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn save(&self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, advance_id, amount, status, created_at, updated_at, finalized_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                finalized_at = EXCLUDED.finalized_at
            "#,
        )
        .bind(payment.id)
        .bind(payment.advance_id)
        .bind(payment.amount.as_decimal())
        .bind(status_str(payment.status))
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.finalized_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_payment_row).transpose()
    }

    async fn find_by_advance(&self, advance_id: AdvanceId) -> Result<Vec<Payment>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM payments WHERE advance_id = $1 ORDER BY created_at")
                .bind(advance_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(parse_payment_row).collect()
    }
}

#[async_trait]
impl AuditLogRepository for PgStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let (subject_kind, subject_id) = subject_columns(entry.subject);

        sqlx::query(
            r#"
            INSERT INTO audit_log
                (id, subject_kind, subject_id, actor, kind, successful,
                 message, extra, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(subject_kind)
        .bind(subject_id)
        .bind(&entry.actor)
        .bind(entry.kind.as_str())
        .bind(entry.successful)
        .bind(&entry.message)
        .bind(&entry.extra)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_subject(
        &self,
        subject: AuditSubject,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let (subject_kind, subject_id) = subject_columns(subject);

        let rows = sqlx::query(
            r#"
            SELECT id, actor, kind, successful, message, extra, created_at
            FROM audit_log
            WHERE subject_kind = $1 AND subject_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(subject_kind)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(db)?;
                let kind: String = row.try_get("kind").map_err(db)?;
                let kind = match kind.as_str() {
                    "REPAYMENT_RESULT" => AuditKind::RepaymentResult,
                    "BALANCE_REFRESH" => AuditKind::BalanceRefresh,
                    other => {
                        return Err(StoreError::Serialization(format!(
                            "Unknown audit kind: {other}"
                        )))
                    }
                };

                Ok(AuditLogEntry {
                    id,
                    subject,
                    actor: row.try_get("actor").map_err(db)?,
                    kind,
                    successful: row.try_get("successful").map_err(db)?,
                    message: row.try_get("message").map_err(db)?,
                    extra: row.try_get("extra").map_err(db)?,
                    created_at: row.try_get("created_at").map_err(db)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Store for PgStore {
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
