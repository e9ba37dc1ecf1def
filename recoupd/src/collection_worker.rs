//! Collection worker: consumes "advance due" messages.
//!
//! Each message triggers one scheduled collection attempt via the
//! executor. Attempts for distinct advances run concurrently up to a
//! configured cap; messages are always acknowledged. A failed attempt is
//! logged and counted, never redelivered, because the next scheduler tick
//! will try the advance again.

use std::sync::Arc;

use recoup_collect::{CollectError, CollectionExecutor};
use recoup_domain::{AdvanceDueForCollection, CollectionAttemptContext};
use recoup_store::Store;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::event_bus::{BusMessage, MessageBus};
use crate::metrics::Metrics;

pub struct CollectionWorker {
    executor: Arc<CollectionExecutor>,
    store: Arc<dyn Store>,
    bus: Arc<MessageBus>,
    metrics: Arc<dyn Metrics>,
    /// Caps concurrent attempts across all advances.
    in_flight: Arc<Semaphore>,
    shutdown_token: CancellationToken,
}

impl CollectionWorker {
    pub fn new(
        executor: Arc<CollectionExecutor>,
        store: Arc<dyn Store>,
        bus: Arc<MessageBus>,
        metrics: Arc<dyn Metrics>,
        max_in_flight: usize,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            executor,
            store,
            bus,
            metrics,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            shutdown_token,
        }
    }

    /// Start the worker in the background.
    ///
    /// The bus subscription is taken before the task is spawned, so
    /// messages published as soon as this returns are seen even if the
    /// task has not run yet.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.bus.subscribe();
        tokio::spawn(async move {
            info!(
                permits = self.in_flight.available_permits(),
                "Collection worker started"
            );

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Collection worker received shutdown signal");
                        break;
                    }
                    message = receiver.recv() => {
                        match message {
                            Some(Ok(BusMessage::AdvanceDue(due))) => {
                                let permit = match self.in_flight.clone().acquire_owned().await {
                                    Ok(permit) => permit,
                                    Err(_) => break, // semaphore closed, shutting down
                                };
                                let worker = Arc::clone(&self);
                                tokio::spawn(async move {
                                    worker.handle(due).await;
                                    drop(permit);
                                });
                            }
                            Some(Ok(BusMessage::Shutdown)) => {
                                info!("Collection worker received shutdown message");
                                break;
                            }
                            Some(Ok(_)) => {
                                // Not ours; the reconciliation worker handles it.
                            }
                            Some(Err(lag_msg)) => {
                                warn!(%lag_msg, "Collection worker receiver lagged");
                            }
                            None => {
                                info!("Message bus closed, collection worker exiting");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Collection worker stopped");
        })
    }

    /// Handle one "advance due" message. Never propagates: errors are
    /// logged and counted, and the message is considered consumed.
    async fn handle(&self, due: AdvanceDueForCollection) {
        let advance = match self.store.advances().find_by_id(due.advance_id).await {
            Ok(Some(advance)) => advance,
            Ok(None) => {
                warn!(advance_id = due.advance_id, "Advance due but not found");
                self.metrics.increment("advance_not_found", &[]);
                return;
            }
            Err(e) => {
                error!(
                    advance_id = due.advance_id,
                    error = %e,
                    "Failed to load advance for collection"
                );
                self.metrics.increment(
                    "collection_attempt_failed",
                    &[("error", "store_error")],
                );
                return;
            }
        };

        let ctx = CollectionAttemptContext::scheduled();
        match self.executor.run_attempt(&advance, &ctx).await {
            Ok(attempt_id) => {
                info!(
                    advance_id = advance.id,
                    attempt_id = %attempt_id,
                    "Scheduled collection attempt dispatched"
                );
                self.metrics.increment("collection_attempt_dispatched", &[]);
            }
            Err(CollectError::NothingOutstanding(advance_id)) => {
                // Settled between scheduling and delivery; normal.
                info!(advance_id, "Advance already settled, skipping attempt");
                self.metrics.increment("collection_skipped_settled", &[]);
            }
            Err(e) => {
                warn!(
                    advance_id = advance.id,
                    error = %e,
                    "Scheduled collection attempt failed"
                );
                self.metrics
                    .increment("collection_attempt_failed", &[("error", e.name())]);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CapturingMetrics;
    use recoup_collect::{BalanceError, BalanceRefresher, StubBalanceSource, StubRepaymentEngine};
    use recoup_domain::{AuditSubject, PaymentStatus};
    use recoup_testkit::{store_with_advance, test_advance};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        worker: Arc<CollectionWorker>,
        bus: Arc<MessageBus>,
        store: Arc<recoup_store::MemoryStore>,
        source: Arc<StubBalanceSource>,
        engine: Arc<StubRepaymentEngine>,
        metrics: Arc<CapturingMetrics>,
        token: CancellationToken,
    }

    async fn fixture(outstanding: rust_decimal::Decimal) -> Fixture {
        let store = store_with_advance(&test_advance(500, outstanding)).await;
        let source = Arc::new(StubBalanceSource::new(dec!(1000.00)));
        let engine = Arc::new(StubRepaymentEngine::new());
        let refresher = Arc::new(BalanceRefresher::new(
            source.clone(),
            store.clone() as Arc<dyn Store>,
        ));
        let executor = Arc::new(CollectionExecutor::new(
            refresher,
            engine.clone(),
            store.clone() as Arc<dyn Store>,
        ));
        let bus = Arc::new(MessageBus::new(16));
        let metrics = Arc::new(CapturingMetrics::new());
        let token = CancellationToken::new();
        let worker = Arc::new(CollectionWorker::new(
            executor,
            store.clone() as Arc<dyn Store>,
            bus.clone(),
            metrics.clone(),
            4,
            token.clone(),
        ));
        Fixture {
            worker,
            bus,
            store,
            source,
            engine,
            metrics,
            token,
        }
    }

    async fn settle_in(metrics: &CapturingMetrics, name: &str) {
        for _ in 0..100 {
            if metrics.count(name) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("metric {name} never incremented");
    }

    #[tokio::test]
    async fn test_advance_due_dispatches_attempt() {
        let fx = fixture(dec!(75.00)).await;
        let handle = fx.worker.clone().start();

        fx.bus.publish(BusMessage::AdvanceDue(AdvanceDueForCollection {
            advance_id: 500,
        }));
        settle_in(&fx.metrics, "collection_attempt_dispatched").await;

        let dispatched = fx.engine.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].advance_id, 500);
        assert_eq!(dispatched[0].amount, dec!(75.00)); // full outstanding

        // The speculative payment is on record as Pending.
        let payments = fx
            .store
            .payments()
            .find_by_advance(500)
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Pending);

        fx.token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_advance_is_counted_and_acked() {
        let fx = fixture(dec!(75.00)).await;
        let handle = fx.worker.clone().start();

        fx.bus.publish(BusMessage::AdvanceDue(AdvanceDueForCollection {
            advance_id: 999,
        }));
        settle_in(&fx.metrics, "advance_not_found").await;

        assert!(fx.engine.dispatched().is_empty());

        fx.token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_settled_advance_is_skipped() {
        let fx = fixture(rust_decimal::Decimal::ZERO).await;
        let handle = fx.worker.clone().start();

        fx.bus.publish(BusMessage::AdvanceDue(AdvanceDueForCollection {
            advance_id: 500,
        }));
        settle_in(&fx.metrics, "collection_skipped_settled").await;

        assert!(fx.engine.dispatched().is_empty());
        assert_eq!(fx.source.calls(), 0); // no balance fetch for a settled advance

        fx.token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_failure_is_swallowed_and_audited() {
        let fx = fixture(dec!(75.00)).await;
        fx.source.fail_with(BalanceError::InstitutionUnavailable(
            "institution offline".to_string(),
        ));
        let handle = fx.worker.clone().start();

        fx.bus.publish(BusMessage::AdvanceDue(AdvanceDueForCollection {
            advance_id: 500,
        }));
        settle_in(&fx.metrics, "collection_attempt_failed").await;

        assert_eq!(
            fx.metrics.count_labeled(
                "collection_attempt_failed",
                &[("error", "institution_unavailable")],
            ),
            1
        );
        assert!(fx.engine.dispatched().is_empty());

        // The refresher wrote the failure audit entry.
        let entries = fx
            .store
            .audit_log()
            .find_by_subject(AuditSubject::Advance(500))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].successful);

        fx.token.cancel();
        handle.await.unwrap();
    }
}
