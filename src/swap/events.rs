//! EventBus — typed fan-out of lifecycle events.
//!
//! Backed by a `broadcast` channel: publishing never blocks the driver, and a
//! subscriber that falls behind by more than `capacity` events sees `Lagged`
//! instead of stalling the queue.

use tokio::sync::broadcast;
use tracing::debug;

use super::messages::SwapEvent;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SwapEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        self.tx.subscribe()
    }

    /// Publishes to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: SwapEvent) -> usize {
        let name = event.name();
        let id = event.request().short_id();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("📭 {} for {} dropped: no subscribers", name, id);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::types::{SwapParams, SwapRequest};

    fn req() -> SwapRequest {
        SwapRequest::new(
            SwapParams {
                user_address: "0x1111111111111111111111111111111111111111".into(),
                from_token: "0x2222222222222222222222222222222222222222".into(),
                to_token: "0x3333333333333333333333333333333333333333".into(),
                amount: "1".into(),
                deposit_reference: "0x01".into(),
                ..Default::default()
            },
            3,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let r = req();

        assert_eq!(bus.publish(SwapEvent::RequestCompleted { request: r.clone() }), 2);

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                SwapEvent::RequestCompleted { request } => assert_eq!(request.id, r.id),
                other => panic!("unexpected event {:?}", other.name()),
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(SwapEvent::RequestFailed { request: req() }), 0);
    }
}
