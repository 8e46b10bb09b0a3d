// Fleet-wide wireless configurator service
// Takes exclusive control of wireless dongles before any of them is put
// into configuration mode: enabling the service first disconnects every
// registered wireless node so no client still believes it is connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, trace};

use crate::node::{NodeInfo, NodeStatus};
use crate::registry::{NodeRegistry, StatusObserver};

pub struct WirelessConfigurator {
    registry: Arc<NodeRegistry>,
    enabled: AtomicBool,
}

impl WirelessConfigurator {
    pub fn new(registry: Arc<NodeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            enabled: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enter fleet-wide configuration mode.
    ///
    /// Establishes exclusivity by disconnecting all currently-registered
    /// wireless nodes before any dongle is configured.
    pub fn enable(&self) {
        info!("wireless configurator enabled, disconnecting wireless nodes");
        self.enabled.store(true, Ordering::SeqCst);
        self.registry.disconnect_all_wireless_endpoints();
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

impl StatusObserver for WirelessConfigurator {
    fn node_changed(&self, node: NodeInfo, status: NodeStatus) {
        // Monitoring hook: a node appearing while the configurator holds
        // the fleet is a competing connection worth tracing.
        if self.is_enabled() && status == NodeStatus::Connected {
            trace!(node = %node.uuid, "node connected while configurator active");
        }
    }
}
