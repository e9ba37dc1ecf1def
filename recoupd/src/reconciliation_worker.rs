//! Reconciliation worker: consumes engine result messages.
//!
//! This is where money actually moves on the ledger. Each engine message
//! carries a batch of per-attempt sub-results; every sub-result is settled
//! independently so one bad entry never blocks the rest of the batch.
//! Redelivered results land on an already-terminal payment and are
//! dropped without touching the balance: the state machine, not the
//! transport, carries the idempotency guarantee.

use std::sync::Arc;

use recoup_domain::{
    ledger_amount_from_pennies, Advance, AuditKind, AuditLogEntry, AuditSubject, Finalize,
    PaymentStatus, RepaymentTaskCompleted, TaskPaymentResult, TaskResultStatus,
};
use recoup_store::Store;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::event_bus::{BusMessage, MessageBus};
use crate::metrics::Metrics;

/// Actor recorded on audit entries written by this worker.
const RECONCILIATION_ACTOR: &str = "repayment-engine";

pub struct ReconciliationWorker {
    store: Arc<dyn Store>,
    bus: Arc<MessageBus>,
    metrics: Arc<dyn Metrics>,
    shutdown_token: CancellationToken,
}

impl ReconciliationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<MessageBus>,
        metrics: Arc<dyn Metrics>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            bus,
            metrics,
            shutdown_token,
        }
    }

    /// Start the worker in the background.
    ///
    /// Messages are processed sequentially: results for the same advance
    /// must not race each other's outstanding-balance updates. The bus
    /// subscription is taken before the task is spawned, so messages
    /// published as soon as this returns are seen even if the task has
    /// not run yet.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.bus.subscribe();
        tokio::spawn(async move {
            info!("Reconciliation worker started");

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Reconciliation worker received shutdown signal");
                        break;
                    }
                    message = receiver.recv() => {
                        match message {
                            Some(Ok(BusMessage::TaskCompleted(completed))) => {
                                self.handle(completed).await;
                            }
                            Some(Ok(BusMessage::Shutdown)) => {
                                info!("Reconciliation worker received shutdown message");
                                break;
                            }
                            Some(Ok(_)) => {
                                // Not ours; the collection worker handles it.
                            }
                            Some(Err(lag_msg)) => {
                                warn!(%lag_msg, "Reconciliation worker receiver lagged");
                            }
                            None => {
                                info!("Message bus closed, reconciliation worker exiting");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Reconciliation worker stopped");
        })
    }

    /// Reconcile one engine message. Always consumes the message: a
    /// malformed or partially-failing batch is logged and counted, never
    /// redelivered.
    pub async fn handle(&self, completed: RepaymentTaskCompleted) {
        let task = completed.task;

        let Some(advance_id) = task.advance_id() else {
            warn!("Engine result carries no advance tasks, dropping");
            self.metrics.increment("no_advance_tasks", &[]);
            return;
        };

        let mut advance = match self.store.advances().find_by_id(advance_id).await {
            Ok(Some(advance)) => advance,
            Ok(None) => {
                warn!(advance_id, "Engine result for unknown advance, dropping");
                self.metrics.increment("advance_not_found", &[]);
                return;
            }
            Err(e) => {
                error!(advance_id, error = %e, "Failed to load advance for reconciliation");
                self.metrics
                    .increment("reconciliation_failed", &[("error", "store_error")]);
                return;
            }
        };

        for method in &task.task_payment_methods {
            for result in &method.task_payment_results {
                self.apply_result(&mut advance, result).await;
            }
        }
    }

    /// Apply a single sub-result to the ledger. Errors are absorbed per
    /// result so the remainder of the batch still settles.
    async fn apply_result(&self, advance: &mut Advance, result: &TaskPaymentResult) {
        if result.result == TaskResultStatus::Pending {
            info!(
                advance_id = advance.id,
                attempt_id = ?result.attempt_id,
                "Attempt still pending at the engine, awaiting final result"
            );
            self.metrics.increment("result_pending", &[]);
            return;
        }

        let Some(attempt_id) = result.attempt_id else {
            warn!(advance_id = advance.id, "Sub-result without an attempt id");
            self.metrics.increment("unknown_attempt", &[]);
            self.audit_failure(advance.id, "Sub-result without an attempt id", result)
                .await;
            return;
        };

        let mut payment = match self.store.payments().find_by_id(attempt_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                warn!(
                    advance_id = advance.id,
                    attempt_id = %attempt_id,
                    "Sub-result for an attempt this ledger never recorded"
                );
                self.metrics.increment("unknown_attempt", &[]);
                self.audit_failure(advance.id, "Unknown attempt id", result).await;
                return;
            }
            Err(e) => {
                error!(
                    advance_id = advance.id,
                    attempt_id = %attempt_id,
                    error = %e,
                    "Failed to load payment for reconciliation"
                );
                self.metrics
                    .increment("reconciliation_failed", &[("error", "store_error")]);
                return;
            }
        };

        let terminal_status = match result.result {
            TaskResultStatus::Success => PaymentStatus::Completed,
            TaskResultStatus::Failure => PaymentStatus::Failed,
            TaskResultStatus::Error => PaymentStatus::Errored,
            TaskResultStatus::Pending => unreachable!("pending handled above"),
        };

        match payment.finalize(terminal_status) {
            Ok(Finalize::AlreadyTerminal) => {
                // Redelivery. The first delivery already moved the money.
                info!(
                    advance_id = advance.id,
                    attempt_id = %attempt_id,
                    status = ?payment.status,
                    "Duplicate result for a finalized attempt, dropping"
                );
                self.metrics.increment("duplicate_result", &[]);
            }
            Ok(Finalize::Applied) => {
                if let Err(e) = self.store.payments().save(&payment).await {
                    error!(
                        attempt_id = %attempt_id,
                        error = %e,
                        "Failed to persist finalized payment"
                    );
                    self.metrics
                        .increment("reconciliation_failed", &[("error", "store_error")]);
                    return;
                }

                match terminal_status {
                    PaymentStatus::Completed => {
                        self.settle_success(advance, attempt_id, result).await;
                    }
                    _ => {
                        warn!(
                            advance_id = advance.id,
                            attempt_id = %attempt_id,
                            result = ?result.result,
                            "Collection attempt did not succeed"
                        );
                        self.metrics.increment(
                            "result_failed",
                            &[("status", terminal_status.as_str())],
                        );
                        self.audit_failure(advance.id, "Collection attempt failed", result)
                            .await;
                    }
                }
            }
            Err(e) => {
                error!(
                    attempt_id = %attempt_id,
                    error = %e,
                    "Refusing invalid payment transition"
                );
                self.metrics
                    .increment("reconciliation_failed", &[("error", "domain_error")]);
            }
        }
    }

    /// Reduce the outstanding balance for a successful attempt and write
    /// the success audit entry.
    async fn settle_success(
        &self,
        advance: &mut Advance,
        attempt_id: recoup_domain::PaymentId,
        result: &TaskPaymentResult,
    ) {
        // Engine amounts are negative pennies; the ledger settles in
        // positive dollars.
        let collected = ledger_amount_from_pennies(result.amount_pennies);
        let applied = advance.settle(collected);

        if let Err(e) = self.store.advances().save(advance).await {
            error!(
                advance_id = advance.id,
                error = %e,
                "Failed to persist settled advance"
            );
            self.metrics
                .increment("reconciliation_failed", &[("error", "store_error")]);

            // The payment is already terminal, so a redelivery cannot
            // re-apply this amount. Record the unpersisted decrement so
            // the gap is visible and can be repaired.
            let entry = AuditLogEntry::new(
                AuditSubject::Advance(advance.id),
                RECONCILIATION_ACTOR,
                AuditKind::RepaymentResult,
                false,
                "Collection finalized but settled balance not persisted",
                json!({
                    "attemptId": attempt_id,
                    "collected": collected,
                    "applied": applied,
                    "outstanding": advance.outstanding.as_decimal(),
                    "error": e.to_string(),
                }),
            );
            if let Err(audit_err) = self.store.audit_log().append(&entry).await {
                warn!(advance_id = advance.id, error = %audit_err, "Failed to append audit entry");
            }
            return;
        }

        info!(
            advance_id = advance.id,
            attempt_id = %attempt_id,
            collected = %collected,
            applied = %applied,
            outstanding = %advance.outstanding.as_decimal(),
            "Collection applied to ledger"
        );
        self.metrics.increment("result_applied", &[]);

        let entry = AuditLogEntry::new(
            AuditSubject::Advance(advance.id),
            RECONCILIATION_ACTOR,
            AuditKind::RepaymentResult,
            true,
            "Collection applied",
            json!({
                "attemptId": attempt_id,
                "collected": collected,
                "applied": applied,
                "outstanding": advance.outstanding.as_decimal(),
            }),
        );
        if let Err(e) = self.store.audit_log().append(&entry).await {
            warn!(advance_id = advance.id, error = %e, "Failed to append audit entry");
        }
    }

    async fn audit_failure(
        &self,
        advance_id: recoup_domain::AdvanceId,
        message: &str,
        result: &TaskPaymentResult,
    ) {
        let entry = AuditLogEntry::new(
            AuditSubject::Advance(advance_id),
            RECONCILIATION_ACTOR,
            AuditKind::RepaymentResult,
            false,
            message,
            json!({
                "attemptId": result.attempt_id,
                "amountPennies": result.amount_pennies,
                "result": result.result,
            }),
        );
        if let Err(e) = self.store.audit_log().append(&entry).await {
            warn!(advance_id, error = %e, "Failed to append audit entry");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
