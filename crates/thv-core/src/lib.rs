//! Core domain types and ports for thv transports.
//!
//! This crate has no HTTP or process-spawning code. Transports live in
//! `thv-transport`; the local subprocess runtime lives in `thv-runtime`.

#![deny(unused_crate_dependencies)]

pub mod container;
pub mod error;
pub mod labels;
pub mod ports;
pub mod services;
pub mod transport;

pub use container::{
    ContainerInfo, McpServerEntry, McpServersConfig, ServerInfo, authority, mcp_server_url,
    short_id,
};
pub use error::{FrameError, LabelError, RuntimeError, TransportError};
pub use ports::{
    ExitInfo, LifecycleError, LifecycleManager, NetworkAttachment, StdioAttachment,
    WorkloadOutput, WorkloadProcess, WorkloadRuntime, WorkloadStdin, shutdown_process,
};
pub use services::{ServerService, ServerServiceError};
pub use transport::{
    DEFAULT_GRACE_PERIOD, LOCALHOST_IPV4, MAX_FRAME_BYTES, TransportEvent, TransportState,
    TransportType,
};
