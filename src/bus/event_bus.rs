//! Fan-out pub/sub event channel
//!
//! Publishers hand messages to a frontend queue; a proxy task forwards
//! each to every subscriber whose filters match the encoded topic.
//! Queues are unbounded: the bus never drops a message.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::bus::proxy;
use crate::bus::topic::TopicFilter;
use crate::bus::BusError;
use crate::messages::BusMessage;

struct Subscriber {
    filters: Vec<TopicFilter>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// Shared registry the proxy delivers through.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    fn add(&self, filters: Vec<TopicFilter>) -> (u64, mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { filters, tx });
        (id, rx)
    }

    fn remove(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Fans one message out to every matching subscriber. Subscribers
    /// whose receiver has gone away are dropped from the registry.
    pub(crate) fn deliver(&self, message: &BusMessage) {
        let topic = message.topic();
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.filters.iter().any(|f| f.matches(&topic))
                && subscriber.tx.send(message.clone()).is_err()
            {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }
}

/// Handle to the pub/sub channel. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    frontend: mpsc::UnboundedSender<BusMessage>,
    registry: Arc<SubscriberRegistry>,
}

impl EventBus {
    /// Creates the channel and spawns its proxy. Must be called from
    /// within a tokio runtime.
    pub fn new() -> Self {
        let (frontend, frontend_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriberRegistry::default());
        proxy::spawn_event_proxy(frontend_rx, Arc::clone(&registry));
        Self { frontend, registry }
    }

    /// Publishes a message. Never blocks; fails only if the proxy has
    /// shut down.
    pub fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        self.frontend
            .send(message)
            .map_err(|_| BusError::ChannelClosed("event bus frontend"))
    }

    /// Subscribes with a set of topic filters.
    pub fn subscribe(&self, filters: Vec<TopicFilter>) -> EventSubscription {
        let (id, rx) = self.registry.add(filters);
        EventSubscription {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Dropping it removes the subscriber.
pub struct EventSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<BusMessage>,
    registry: Arc<SubscriberRegistry>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::ServiceId;
    use crate::messages::{Message, MessageType, ServiceType};

    fn sid(s: &str) -> ServiceId {
        ServiceId::try_new(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn subscriber_receives_matching_type() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(vec![TopicFilter::of_type(MessageType::CreditsComplete)]);

        bus.publish(BusMessage::new(sid("tm"), Message::CreditsComplete { was_cancelled: false }))
            .unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.message_type(), MessageType::CreditsComplete);
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_types() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(vec![TopicFilter::of_type(MessageType::Heartbeat)]);

        bus.publish(BusMessage::new(sid("tm"), Message::CreditsComplete { was_cancelled: false }))
            .unwrap();
        bus.publish(BusMessage::new(
            sid("tm"),
            Message::Heartbeat(crate::messages::Heartbeat {
                state: crate::messages::ServiceState::Running,
            }),
        ))
        .unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.message_type(), MessageType::Heartbeat);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn targeted_message_only_reaches_target() {
        let bus = EventBus::new();
        let worker_1 = sid("worker_1");
        let worker_2 = sid("worker_2");
        let mut sub_1 = bus.subscribe(TopicFilter::for_service(
            MessageType::Notification,
            &worker_1,
            ServiceType::Worker,
        ));
        let mut sub_2 = bus.subscribe(TopicFilter::for_service(
            MessageType::Notification,
            &worker_2,
            ServiceType::Worker,
        ));

        bus.publish(
            BusMessage::new(
                sid("controller"),
                Message::Notification(crate::messages::Notification {
                    message: "only for worker_1".to_string(),
                }),
            )
            .with_target_id(worker_1.clone()),
        )
        .unwrap();

        assert!(sub_1.recv().await.is_some());
        // Give the proxy a tick to (not) deliver to worker_2.
        tokio::task::yield_now().await;
        assert!(sub_2.try_recv().is_none());
    }

    #[tokio::test]
    async fn type_targeted_message_reaches_all_of_type() {
        let bus = EventBus::new();
        let worker_1 = sid("worker_1");
        let worker_2 = sid("worker_2");
        let mut sub_1 = bus.subscribe(TopicFilter::for_service(
            MessageType::Notification,
            &worker_1,
            ServiceType::Worker,
        ));
        let mut sub_2 = bus.subscribe(TopicFilter::for_service(
            MessageType::Notification,
            &worker_2,
            ServiceType::Worker,
        ));

        bus.publish(
            BusMessage::new(
                sid("controller"),
                Message::Notification(crate::messages::Notification {
                    message: "all workers".to_string(),
                }),
            )
            .with_target_type(ServiceType::Worker),
        )
        .unwrap();

        assert!(sub_1.recv().await.is_some());
        assert!(sub_2.recv().await.is_some());
    }
}
