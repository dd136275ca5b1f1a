// EN: src/system/notification.rs

use crate::core::commons::lock;
use crate::models::ExecutionNotification;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Fan-out channel for background completion notifications.
///
/// Cloning the bus shares its subscriber list, so several instances can report to the
/// same observers. Subscribers that dropped their receiver are pruned on publish.
#[derive(Clone, Default)]
pub struct NotificationBus {
    subscribers: Arc<Mutex<Vec<Sender<ExecutionNotification>>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ExecutionNotification> {
        let (sender, receiver) = mpsc::channel();
        lock(&self.subscribers).push(sender);
        receiver
    }

    /// Delivers `notification` to every live subscriber. Returns how many received it.
    pub fn publish(&self, notification: ExecutionNotification) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|subscriber| subscriber.send(notification.clone()).is_ok());
        log::debug!(
            "Published notification {} ({}) to {} subscriber(s)",
            notification.execution_id,
            notification.execution_status,
            subscribers.len()
        );
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionStatus;
    use uuid::Uuid;

    fn notification() -> ExecutionNotification {
        ExecutionNotification {
            execution_id: Uuid::new_v4(),
            results: b"done".to_vec(),
            execution_status: ExecutionStatus::FinishedSuccessfully,
            task_return_value: 0,
            error: None,
        }
    }

    #[test]
    fn test_every_subscriber_receives_once() {
        let bus = NotificationBus::new();
        let first = bus.subscribe();
        let second = bus.clone().subscribe();

        let sent = notification();
        assert_eq!(bus.publish(sent.clone()), 2);

        for receiver in [&first, &second] {
            let received = receiver.try_recv().unwrap();
            assert_eq!(received.execution_id, sent.execution_id);
            assert_eq!(received.results, b"done");
            assert!(receiver.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = NotificationBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(notification()), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        assert_eq!(NotificationBus::new().publish(notification()), 0);
    }
}
