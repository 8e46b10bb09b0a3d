// Node module - logical protocol entities reachable through endpoints

mod node;

pub use node::{Node, NodeEvent, NodeInfo, NodeStatus, NodeUuid};
