//! Stub port implementations for tests and development.
//!
//! Behavior is configurable after construction so a single test can drive
//! a source through healthy, slow, and failing phases.

use async_trait::async_trait;
use chrono::Utc;
use recoup_domain::BankAccount;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{BalanceError, EngineError};
use crate::ports::{
    BalanceSnapshot, BalanceSourcePort, CollectionTask, FetchContext, RepaymentEnginePort,
};

// =============================================================================
// Stub balance source
// =============================================================================

/// Balance source stub with configurable latency and failure mode.
pub struct StubBalanceSource {
    available: Mutex<Decimal>,
    delay: Mutex<Duration>,
    failure: Mutex<Option<BalanceError>>,
    calls: AtomicUsize,
}

impl StubBalanceSource {
    pub fn new(available: Decimal) -> Self {
        Self {
            available: Mutex::new(available),
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: Decimal) {
        *self.available.lock().unwrap() = available;
    }

    /// Simulated upstream latency per fetch.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Make every subsequent fetch fail with this error.
    pub fn fail_with(&self, error: BalanceError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// How many times upstream was actually hit.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceSourcePort for StubBalanceSource {
    async fn fetch_balance(
        &self,
        bank_account: &BankAccount,
        _ctx: &FetchContext,
    ) -> Result<BalanceSnapshot, BalanceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let available = *self.available.lock().unwrap();
        Ok(BalanceSnapshot {
            bank_account_id: bank_account.id,
            available,
            current: available,
            as_of: Utc::now(),
        })
    }
}

// =============================================================================
// Stub repayment engine
// =============================================================================

/// Repayment engine stub that records every dispatched task.
pub struct StubRepaymentEngine {
    dispatched: Mutex<Vec<CollectionTask>>,
    fail: AtomicBool,
}

impl StubRepaymentEngine {
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every subsequent dispatch fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<CollectionTask> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }
}

impl Default for StubRepaymentEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepaymentEnginePort for StubRepaymentEngine {
    async fn dispatch(&self, task: &CollectionTask) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError("stub engine configured to fail".to_string()));
        }
        self.dispatched.lock().unwrap().push(task.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn bank_account() -> BankAccount {
        BankAccount {
            id: 7,
            institution: "Stub Bank".to_string(),
        }
    }

    fn ctx() -> FetchContext {
        FetchContext {
            advance_id: 1,
            caller: "test".to_string(),
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stub_source_counts_calls_and_fails_on_demand() {
        let source = StubBalanceSource::new(dec!(50.00));

        let snapshot = source.fetch_balance(&bank_account(), &ctx()).await.unwrap();
        assert_eq!(snapshot.available, dec!(50.00));
        assert_eq!(source.calls(), 1);

        source.fail_with(BalanceError::Upstream("boom".to_string()));
        assert!(source.fetch_balance(&bank_account(), &ctx()).await.is_err());
        assert_eq!(source.calls(), 2);

        source.clear_failure();
        assert!(source.fetch_balance(&bank_account(), &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stub_engine_records_tasks() {
        let engine = StubRepaymentEngine::new();
        let task = CollectionTask {
            attempt_id: Uuid::now_v7(),
            advance_id: 500,
            instrument: recoup_domain::PaymentInstrument::Ach,
            amount: dec!(75.00),
        };

        engine.dispatch(&task).await.unwrap();
        assert_eq!(engine.dispatch_count(), 1);
        assert_eq!(engine.dispatched()[0].advance_id, 500);

        engine.set_failing(true);
        assert!(engine.dispatch(&task).await.is_err());
        assert_eq!(engine.dispatch_count(), 1);
    }
}
