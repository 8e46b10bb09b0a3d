// Registry module - process-wide endpoint directory and status observation

mod observer;
mod registry;

pub use observer::StatusObserver;
pub use registry::NodeRegistry;
