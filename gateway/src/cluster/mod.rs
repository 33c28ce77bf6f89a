//! Cluster control plane: the node registry, the telemetry poller that
//! feeds it, and the scheduler that reads it.

pub mod poller;
pub mod registry;
pub mod scheduler;

pub use poller::TelemetryPoller;
pub use registry::{AcquireError, NodeId, NodeLease, NodeRegistry, NodeSnapshot, RegistrySettings};
pub use scheduler::Requirements;
