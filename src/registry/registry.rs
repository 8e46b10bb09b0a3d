// Node Registry - process-wide directory of endpoints and their nodes
// Holds weak, lookup-only references: the registry never outlives (or keeps
// alive) the endpoints it indexes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use super::observer::StatusObserver;
use crate::endpoint::{Endpoint, EndpointId, EndpointShared};
use crate::node::{NodeInfo, NodeStatus};

struct EndpointEntry {
    endpoint: Weak<EndpointShared>,
    wireless: bool,
}

#[derive(Default)]
struct RegistryInner {
    endpoints: HashMap<EndpointId, EndpointEntry>,
    observers: Vec<Arc<dyn StatusObserver>>,
}

/// Process-wide directory mapping endpoint identity to live endpoints,
/// with change notification for node status transitions.
///
/// One instance per running service; all interior state behind a plain
/// mutex, never held across an await.
pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    /// Insert or refresh an endpoint entry.
    ///
    /// Also called after a wireless settings sync, whose exchange may have
    /// changed the endpoint's identity.
    pub fn register_endpoint(&self, endpoint: &Endpoint) {
        let mut inner = self.inner.lock().unwrap();
        let id = endpoint.id();
        debug!(endpoint = %id, "registering endpoint");
        inner.endpoints.insert(
            id,
            EndpointEntry {
                endpoint: endpoint.downgrade(),
                wireless: endpoint.is_wireless(),
            },
        );
    }

    /// Drop entries whose endpoint no longer exists. Returns how many were
    /// swept.
    pub fn unregister_expired_endpoints(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.endpoints.len();
        inner
            .endpoints
            .retain(|_, entry| entry.endpoint.strong_count() > 0);
        let swept = before - inner.endpoints.len();
        if swept > 0 {
            info!(swept, "unregistered expired endpoints");
        }
        swept
    }

    /// Disconnect the nodes of every registered wireless endpoint.
    ///
    /// Used when entering fleet-wide wireless configuration: a dongle must
    /// not be configured while a client still believes it is connected.
    pub fn disconnect_all_wireless_endpoints(&self) {
        let targets: Vec<Arc<EndpointShared>> = {
            let inner = self.inner.lock().unwrap();
            inner
                .endpoints
                .values()
                .filter(|e| e.wireless)
                .filter_map(|e| e.endpoint.upgrade())
                .collect()
        };
        for shared in targets {
            let endpoint = Endpoint::from_shared(shared);
            tokio::spawn(async move {
                endpoint.disconnect_nodes().await;
            });
        }
    }

    /// Subscribe to node status changes.
    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) {
        self.inner.lock().unwrap().observers.push(observer);
    }

    /// Fan a status change out to every subscriber.
    ///
    /// Observers are called outside the registry lock so they may call back
    /// into the registry.
    pub fn notify_node_changed(&self, node: NodeInfo, status: NodeStatus) {
        let observers: Vec<Arc<dyn StatusObserver>> =
            self.inner.lock().unwrap().observers.clone();
        for observer in observers {
            observer.node_changed(node, status);
        }
    }

    /// Number of registered endpoints (live or not yet swept).
    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().unwrap().endpoints.len()
    }

    /// Upgrade a registered endpoint by id, if it is still alive.
    pub fn endpoint(&self, id: EndpointId) -> Option<Endpoint> {
        self.inner
            .lock()
            .unwrap()
            .endpoints
            .get(&id)
            .and_then(|e| e.endpoint.upgrade())
            .map(Endpoint::from_shared)
    }
}
