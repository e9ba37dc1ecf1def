//! Builders for the entities and messages the pipeline tests exercise.

use recoup_domain::{
    Advance, AdvanceId, AdvanceTask, BankAccount, OutstandingAmount, PaymentId,
    PaymentInstrument, RepaymentTask, RepaymentTaskCompleted, TaskPaymentMethod,
    TaskPaymentResult, TaskResultStatus,
};
use recoup_store::{AdvanceRepository, MemoryStore};
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn test_bank_account() -> BankAccount {
    BankAccount {
        id: 42,
        institution: "First Test Bank".to_string(),
    }
}

pub fn test_advance(id: AdvanceId, outstanding: Decimal) -> Advance {
    Advance::new(
        id,
        OutstandingAmount::new(outstanding).expect("test outstanding must be non-negative"),
        test_bank_account(),
    )
}

/// A memory store pre-populated with one advance.
pub async fn store_with_advance(advance: &Advance) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.save(advance).await.expect("memory store save cannot fail");
    store
}

/// An engine result message carrying the given sub-results on one ACH
/// payment method.
pub fn task_completed_message(
    advance_id: AdvanceId,
    results: Vec<TaskPaymentResult>,
) -> RepaymentTaskCompleted {
    RepaymentTaskCompleted {
        task: RepaymentTask {
            advance_tasks: vec![AdvanceTask { advance_id }],
            task_payment_methods: vec![TaskPaymentMethod {
                method: PaymentInstrument::Ach,
                task_payment_results: results,
            }],
        },
    }
}

/// An engine result message with exactly one sub-result.
pub fn single_result_message(
    advance_id: AdvanceId,
    attempt_id: PaymentId,
    amount_pennies: i64,
    result: TaskResultStatus,
) -> RepaymentTaskCompleted {
    task_completed_message(
        advance_id,
        vec![TaskPaymentResult {
            attempt_id: Some(attempt_id),
            amount_pennies,
            result,
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_builders_produce_consistent_shapes() {
        let advance = test_advance(500, dec!(75.00));
        let store = store_with_advance(&advance).await;
        assert_eq!(store.advance_count(), 1);

        let message =
            single_result_message(500, Uuid::now_v7(), -7500, TaskResultStatus::Success);
        assert_eq!(message.task.advance_id(), Some(500));
        assert_eq!(message.task.result_count(), 1);
    }
}
