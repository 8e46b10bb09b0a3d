// Endpoint group - event fan-out between sibling endpoints
// Endpoints sharing a logical group (e.g. robots running one program) see
// each other's events; clients subscribe to the group to observe the whole
// fleet slice.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::node::NodeUuid;
use crate::protocol::PropertyValue;

use super::EndpointId;

/// An event broadcast within a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEvent {
    pub origin: EndpointId,
    pub node: NodeUuid,
    pub name: String,
    pub value: PropertyValue,
}

/// A logical group of endpoints sharing event traffic.
pub struct EndpointGroup {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<GroupEvent>>>,
}

impl EndpointGroup {
    /// Every endpoint starts in a group of its own; endpoints join a
    /// shared group when their robots run the same program.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GroupEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Fan an event out to all live subscribers.
    pub fn broadcast(&self, event: GroupEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|sub| sub.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let group = EndpointGroup::new();
        let mut rx = group.subscribe();

        let event = GroupEvent {
            origin: EndpointId::generate(),
            node: NodeUuid::generate(),
            name: "button".to_string(),
            value: PropertyValue::Integer(1),
        };
        group.broadcast(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_dead_subscribers_are_pruned() {
        let group = EndpointGroup::new();
        let rx = group.subscribe();
        drop(rx);

        group.broadcast(GroupEvent {
            origin: EndpointId::generate(),
            node: NodeUuid::generate(),
            name: "tap".to_string(),
            value: PropertyValue::Null,
        });
        assert_eq!(group.subscriber_count(), 0);
    }
}
