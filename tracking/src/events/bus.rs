//! Event bus for tracking notifications
//!
//! Tokio broadcast pub/sub. Publishing with no subscribers is not an error:
//! the ledger and attempt log are the durable record, events are only
//! notifications.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::TrackingEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast event bus
pub struct EventBus {
    sender: broadcast::Sender<TrackingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: TrackingEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events of a single order
    pub fn subscribe_order(&self, order_id: &str) -> OrderReceiver {
        OrderReceiver {
            receiver: self.subscribe(),
            order_id: order_id.to_string(),
        }
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields events for one order
pub struct OrderReceiver {
    receiver: broadcast::Receiver<TrackingEvent>,
    order_id: String,
}

impl OrderReceiver {
    /// Receive the next event for the order
    pub async fn recv(&mut self) -> Result<TrackingEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.order_id() == self.order_id {
                return Ok(event);
            }
        }
    }

    /// Drain already-published events without waiting
    pub fn drain(&mut self) -> Vec<TrackingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            if event.order_id() == self.order_id {
                events.push(event);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StageCode;
    use chrono::Utc;

    fn initialized(order_id: &str) -> TrackingEvent {
        TrackingEvent::TrackingInitialized {
            order_id: order_id.to_string(),
            stage: StageCode::OrderCreated,
            created_by: "system".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(initialized("PO-1"));

        assert_eq!(rx1.recv().await.unwrap().event_type(), "tracking_initialized");
        assert_eq!(rx2.recv().await.unwrap().order_id(), "PO-1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(initialized("PO-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_order_receiver_filters() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe_order("PO-2");

        bus.publish(initialized("PO-1"));
        bus.publish(initialized("PO-2"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.order_id(), "PO-2");
        assert!(receiver.drain().is_empty());
    }
}
