// Node - a logical protocol entity behind an endpoint
// Normally exactly one per endpoint, though the model permits several.
// Status changes are pushed to the registry's observers; decoded events are
// delivered to subscribed client sinks.

use std::fmt;
use std::sync::{Mutex, Weak};
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::PropertyValue;
use crate::registry::NodeRegistry;

/// Globally-unique node identifier, generated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeUuid([u8; 16]);

impl NodeUuid {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Connection status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Identity snapshot passed to status observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub uuid: NodeUuid,
    pub native_id: u16,
}

/// An event delivered to node subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub name: String,
    pub value: PropertyValue,
}

/// A logical protocol entity running on the robot side of an endpoint.
pub struct Node {
    native_id: u16,
    uuid: NodeUuid,
    status: Mutex<NodeStatus>,
    last_seen: Mutex<Instant>,
    sinks: Mutex<Vec<mpsc::UnboundedSender<NodeEvent>>>,
    registry: Weak<NodeRegistry>,
}

impl Node {
    pub fn new(native_id: u16, registry: Weak<NodeRegistry>) -> Self {
        Self {
            native_id,
            uuid: NodeUuid::generate(),
            status: Mutex::new(NodeStatus::Connecting),
            last_seen: Mutex::new(Instant::now()),
            sinks: Mutex::new(Vec::new()),
            registry,
        }
    }

    pub fn native_id(&self) -> u16 {
        self.native_id
    }

    pub fn uuid(&self) -> NodeUuid {
        self.uuid
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            uuid: self.uuid,
            native_id: self.native_id,
        }
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.lock().unwrap()
    }

    /// Transition status and notify the registry's observers.
    pub fn set_status(&self, status: NodeStatus) {
        {
            let mut current = self.status.lock().unwrap();
            if *current == status {
                return;
            }
            *current = status;
        }
        debug!(node = %self.uuid, ?status, "node status changed");
        if let Some(registry) = self.registry.upgrade() {
            registry.notify_node_changed(self.info(), status);
        }
    }

    pub fn connect(&self) {
        self.set_status(NodeStatus::Connected);
    }

    pub fn disconnect(&self) {
        self.set_status(NodeStatus::Disconnected);
    }

    /// Record protocol activity for health checking.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }

    /// Whether the node has been silent for longer than `max_idle`.
    pub fn is_stale(&self, max_idle: std::time::Duration) -> bool {
        self.last_seen.lock().unwrap().elapsed() > max_idle
    }

    /// Subscribe to events decoded for this node.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().unwrap().push(tx);
        rx
    }

    /// Deliver a decoded event to all live subscribers.
    pub fn deliver(&self, name: &str, value: PropertyValue) {
        self.touch();
        let event = NodeEvent {
            name: name.to_string(),
            value,
        };
        self.sinks
            .lock()
            .unwrap()
            .retain(|sink| sink.send(event.clone()).is_ok());
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("native_id", &self.native_id)
            .field("uuid", &self.uuid)
            .field("status", &self.status())
            .finish()
    }
}
