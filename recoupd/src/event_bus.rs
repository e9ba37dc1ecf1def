//! Internal message bus.
//!
//! Carries the two inbound triggers to their consumers:
//! - Scheduler -> Collection worker ("advance due")
//! - Repayment engine -> Reconciliation worker ("task completed")
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.
//! Delivery here is fire-and-forget: the financial guarantee lives in the
//! ledger's idempotency, not in bus semantics.

use recoup_domain::{AdvanceDueForCollection, RepaymentTaskCompleted};
use tokio::sync::broadcast;

/// Messages that flow through the daemon bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// An advance is due for a collection attempt
    AdvanceDue(AdvanceDueForCollection),

    /// The engine reported batched results for a collection task
    TaskCompleted(RepaymentTaskCompleted),

    /// Shutdown signal
    Shutdown,
}

/// Bus for daemon-wide message delivery.
///
/// Multiple producers can publish, and multiple consumers can receive.
pub struct MessageBus {
    sender: broadcast::Sender<BusMessage>,
}

impl MessageBus {
    /// Create a new bus with the given buffer capacity.
    ///
    /// Capacity determines how many messages can be buffered before slow
    /// receivers start missing messages (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a message to all subscribers.
    ///
    /// Returns the number of receivers that got the message (0 if none).
    pub fn publish(&self, message: BusMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    /// Subscribe to messages published after this call.
    pub fn subscribe(&self) -> MessageReceiver {
        MessageReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver side of the bus.
pub struct MessageReceiver {
    receiver: broadcast::Receiver<BusMessage>,
}

impl MessageReceiver {
    /// Receive the next message.
    ///
    /// Returns `None` once all senders are gone; `Some(Err(..))` with a
    /// description if the receiver lagged and missed messages.
    pub async fn recv(&mut self) -> Option<Result<BusMessage, String>> {
        match self.receiver.recv().await {
            Ok(message) => Some(Ok(message)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} messages", count)))
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
    use recoup_domain::TaskResultStatus;
    use recoup_testkit::single_result_message;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_and_receive_advance_due() {
        let bus = MessageBus::new(10);
        let mut receiver = bus.subscribe();

        bus.publish(BusMessage::AdvanceDue(AdvanceDueForCollection { advance_id: 500 }));

        let message = receiver.recv().await.unwrap().unwrap();
        match message {
            BusMessage::AdvanceDue(due) => assert_eq!(due.advance_id, 500),
            _ => panic!("Expected AdvanceDue message"),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_receivers() {
        let bus = MessageBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        assert_eq!(bus.receiver_count(), 2);

        let message = single_result_message(500, Uuid::now_v7(), -7500, TaskResultStatus::Success);
        bus.publish(BusMessage::TaskCompleted(message));

        let m1 = receiver1.recv().await.unwrap().unwrap();
        let m2 = receiver2.recv().await.unwrap().unwrap();
        assert!(matches!(m1, BusMessage::TaskCompleted(_)));
        assert!(matches!(m2, BusMessage::TaskCompleted(_)));
    }

    #[tokio::test]
    async fn test_publish_with_no_receivers() {
        let bus = MessageBus::new(10);

        // Publishing with no receivers should not panic.
        let count = bus.publish(BusMessage::Shutdown);
        assert_eq!(count, 0);
    }
}
