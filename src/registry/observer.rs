// Status observation - change notification for node status transitions

use crate::node::{NodeInfo, NodeStatus};

/// Single-method capability interface for status subscribers.
///
/// Observers are invoked synchronously on every node status change, from
/// whichever task performed the transition. Implementations must not block.
pub trait StatusObserver: Send + Sync {
    fn node_changed(&self, node: NodeInfo, status: NodeStatus);
}
