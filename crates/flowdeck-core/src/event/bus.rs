//! Broadcast event bus for distributing `FlowEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the bus supports multiple concurrent
//! subscribers (debugger sessions, log forwarders). Publishing with no
//! active subscribers is a no-op.

use flowdeck_types::event::FlowEvent;
use tokio::sync::broadcast;

/// Multi-consumer event bus for run lifecycle events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct FlowEventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl FlowEventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    /// Access the underlying broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<FlowEvent> {
        &self.sender
    }
}

impl Default for FlowEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for FlowEventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for FlowEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_event() -> FlowEvent {
        FlowEvent::NodeStarted {
            run_id: Uuid::now_v7(),
            node_id: "n1".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = FlowEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(sample_event());

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, FlowEvent::NodeStarted { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = FlowEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(sample_event());

        assert!(matches!(
            rx1.recv().await.unwrap(),
            FlowEvent::NodeStarted { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            FlowEvent::NodeStarted { .. }
        ));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = FlowEventBus::new(16);
        // No subscribers -- should not panic
        bus.publish(sample_event());
        bus.publish(sample_event());
    }

    #[tokio::test]
    async fn lagged_receiver_handles_gracefully() {
        let bus = FlowEventBus::new(4); // Small capacity to trigger lag
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish(FlowEvent::NodeCompleted {
                run_id: Uuid::now_v7(),
                node_id: format!("n{i}"),
            });
        }

        // Receiver may get a Lagged error -- should not panic
        match rx.try_recv() {
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = FlowEventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(sample_event());

        assert!(rx.try_recv().is_ok());
    }
}
