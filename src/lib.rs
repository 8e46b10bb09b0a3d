// botlink - robot device manager
// Bridges a fleet of small robot controllers to client applications over a
// uniform message protocol across USB, serial and TCP transports. The core
// owns the endpoint lifecycle, the node registry and the wire protocol;
// transport discovery, firmware storage and the byte-level bootloader live
// behind traits implemented outside the core.

pub mod endpoint;
pub mod firmware;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod wireless;

pub use endpoint::{Endpoint, EndpointConfig, EndpointDeps, EndpointError, EndpointId};
pub use node::{Node, NodeStatus, NodeUuid};
pub use protocol::PropertyValue;
pub use registry::NodeRegistry;
pub use transport::{TransportError, TransportKind};
