//! Inbound message shapes.
//!
//! Wire contracts consumed by the daemon: the scheduler's "advance due"
//! trigger and the repayment engine's batched task results. Field names
//! follow the engine's camelCase JSON.

use crate::entities::PaymentInstrument;
use crate::value_objects::{AdvanceId, PaymentId};
use serde::{Deserialize, Serialize};

/// Trigger: this advance is due for a collection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceDueForCollection {
    pub advance_id: AdvanceId,
}

/// The engine finished (part of) a collection task and is reporting
/// per-payment-method, per-attempt outcomes. Delivery is at-least-once and
/// may be out of order; reconciliation must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentTaskCompleted {
    pub task: RepaymentTask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentTask {
    #[serde(default)]
    pub advance_tasks: Vec<AdvanceTask>,
    #[serde(default)]
    pub task_payment_methods: Vec<TaskPaymentMethod>,
}

impl RepaymentTask {
    /// The advance this task is about, if the message carries one.
    ///
    /// The engine puts the advance on `advanceTasks[0]`; a task without it
    /// is malformed-but-harmless and gets acked without ledger effect.
    pub fn advance_id(&self) -> Option<AdvanceId> {
        self.advance_tasks.first().map(|t| t.advance_id)
    }

    /// Total number of sub-results across all payment methods.
    pub fn result_count(&self) -> usize {
        self.task_payment_methods
            .iter()
            .map(|m| m.task_payment_results.len())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceTask {
    pub advance_id: AdvanceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPaymentMethod {
    pub method: PaymentInstrument,
    #[serde(default)]
    pub task_payment_results: Vec<TaskPaymentResult>,
}

/// One attempt outcome within a task.
///
/// `amountPennies` uses the engine's convention: negative means money was
/// collected from the borrower. `attemptId` echoes the collection attempt
/// id we put on the dispatched task; it is the reconciliation idempotency
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPaymentResult {
    #[serde(default)]
    pub attempt_id: Option<PaymentId>,
    pub amount_pennies: i64,
    pub result: TaskResultStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResultStatus {
    Success,
    Pending,
    Failure,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_task_completed_deserializes_engine_json() {
        let attempt_id = Uuid::now_v7();
        let json = format!(
            r#"{{
                "task": {{
                    "advanceTasks": [{{"advanceId": 500}}],
                    "taskPaymentMethods": [{{
                        "method": "ach",
                        "taskPaymentResults": [
                            {{"attemptId": "{attempt_id}", "amountPennies": -7500, "result": "SUCCESS"}}
                        ]
                    }}]
                }}
            }}"#
        );

        let message: RepaymentTaskCompleted = serde_json::from_str(&json).unwrap();
        assert_eq!(message.task.advance_id(), Some(500));
        assert_eq!(message.task.result_count(), 1);

        let result = message.task.task_payment_methods[0].task_payment_results[0];
        assert_eq!(result.attempt_id, Some(attempt_id));
        assert_eq!(result.amount_pennies, -7500);
        assert_eq!(result.result, TaskResultStatus::Success);
    }

    #[test]
    fn test_task_without_advance_tasks_is_parseable() {
        let json = r#"{"task": {"taskPaymentMethods": []}}"#;
        let message: RepaymentTaskCompleted = serde_json::from_str(json).unwrap();

        assert_eq!(message.task.advance_id(), None);
        assert_eq!(message.task.result_count(), 0);
    }

    #[test]
    fn test_result_without_attempt_id() {
        let json = r#"{"amountPennies": -1000, "result": "FAILURE"}"#;
        let result: TaskPaymentResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.attempt_id, None);
        assert_eq!(result.result, TaskResultStatus::Failure);
    }

    #[test]
    fn test_advance_due_round_trip() {
        let due = AdvanceDueForCollection { advance_id: 500 };
        let json = serde_json::to_string(&due).unwrap();
        assert_eq!(json, r#"{"advanceId":500}"#);

        let parsed: AdvanceDueForCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, due);
    }
}
