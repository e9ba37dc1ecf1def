//! Collection executor: one collection attempt end to end.
//!
//! Orchestrates a single attempt for an advance: refresh the balance under
//! the single-flight lock, record a speculative `Pending` payment, then
//! fire-and-forget the task to the repayment engine. The ledger's
//! financial guarantee lives in reconciliation, not here. This path only
//! ensures the attempt is recorded before the engine can possibly report
//! on it, and withdraws the record if the engine never accepted the task.

use std::sync::Arc;

use recoup_domain::{
    Advance, CollectionAttemptContext, Payment, PaymentAmount, PaymentId,
};
use recoup_store::Store;
use tracing::{info, warn};

use crate::error::CollectError;
use crate::ports::{CollectionTask, RepaymentEnginePort};
use crate::refresh::{BalanceRefresher, RefreshOptions};

pub struct CollectionExecutor {
    refresher: Arc<BalanceRefresher>,
    engine: Arc<dyn RepaymentEnginePort>,
    store: Arc<dyn Store>,
}

impl CollectionExecutor {
    pub fn new(
        refresher: Arc<BalanceRefresher>,
        engine: Arc<dyn RepaymentEnginePort>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            refresher,
            engine,
            store,
        }
    }

    /// Run one collection attempt for the advance.
    ///
    /// Returns the attempt id (the speculative payment's id, which the
    /// engine echoes back in its results).
    ///
    /// # Errors
    ///
    /// - `NothingOutstanding` if the advance is already settled
    /// - `Balance(..)` if the refresh failed (audited by the refresher)
    /// - `InsufficientFunds` if the refreshed balance cannot cover the
    ///   collection amount; no payment is recorded
    /// - `Engine(..)` if the engine rejected the task; the speculative
    ///   payment is canceled before the error is returned
    pub async fn run_attempt(
        &self,
        advance: &Advance,
        ctx: &CollectionAttemptContext,
    ) -> Result<PaymentId, CollectError> {
        let amount = advance.collection_amount(ctx.retrieve_full_outstanding);
        if amount <= rust_decimal::Decimal::ZERO {
            return Err(CollectError::NothingOutstanding(advance.id));
        }

        let refresh = self
            .refresher
            .refresh_with_lock(
                advance.id,
                &advance.bank_account,
                &ctx.caller,
                RefreshOptions::default(),
            )
            .await?;

        if refresh.snapshot.available < amount {
            return Err(CollectError::InsufficientFunds {
                advance_id: advance.id,
                available: refresh.snapshot.available,
                amount,
            });
        }

        // Record the attempt before the engine can possibly act on it.
        let mut payment = Payment::new(advance.id, PaymentAmount::new(amount)?);
        self.store.payments().save(&payment).await?;

        let task = CollectionTask {
            attempt_id: payment.id,
            advance_id: advance.id,
            instrument: advance.instrument,
            amount,
        };

        if let Err(dispatch_err) = self.engine.dispatch(&task).await {
            warn!(
                advance_id = advance.id,
                attempt_id = %payment.id,
                error = %dispatch_err,
                "Engine rejected collection task; withdrawing speculative payment"
            );
            payment.cancel()?;
            self.store.payments().save(&payment).await?;
            return Err(dispatch_err.into());
        }

        info!(
            advance_id = advance.id,
            attempt_id = %payment.id,
            amount = %amount,
            caller = %ctx.caller,
            "Collection task dispatched"
        );
        Ok(payment.id)
    }
}

// =============================================================================
// Tests
// =============================================================================
