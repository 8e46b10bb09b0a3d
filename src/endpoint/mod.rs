// Endpoint module - managed robot connections
// An endpoint pairs a transport handle with the logical nodes reachable
// through it and serializes every operation on the pair.

pub mod config;
mod driver;
pub mod endpoint;
pub mod group;
mod queue;

pub use config::EndpointConfig;
pub use endpoint::{
    Endpoint, EndpointDeps, EndpointError, EndpointId, EndpointKind, EndpointMode, EndpointShared,
    UpgradeProgress,
};
pub use group::{EndpointGroup, GroupEvent};
