//! Port definitions for the systems transports and services depend on.
//!
//! Ports carry no implementation details: no container engine types and no
//! process-spawning specifics leak into their signatures.

pub mod lifecycle;
pub mod runtime;

pub use lifecycle::{LifecycleError, LifecycleManager};
pub use runtime::{
    ExitInfo, NetworkAttachment, StdioAttachment, WorkloadOutput, WorkloadProcess,
    WorkloadRuntime, WorkloadStdin, shutdown_process,
};
