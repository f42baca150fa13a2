//! Error taxonomy for transports and the ports they consume.
//!
//! Construction-time errors (`UnsupportedTransport`, `InvalidConfig`) are
//! returned synchronously and leave no partial state. Run-time errors on one
//! connection (`Frame`, `BackendUnreachable`) are answered on that connection
//! only. Loss of the backend (`BackendTerminated`) is the only condition that
//! stops a whole instance.

use std::io;

use thiserror::Error;

use crate::transport::TransportState;

/// Errors produced by transport construction and lifecycle operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The requested transport kind is not one of the supported variants.
    #[error("unsupported transport type: {0:?}")]
    UnsupportedTransport(String),

    /// Configuration values failed validation.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// A lifecycle operation was invoked in a state that does not allow it.
    #[error("cannot {operation} a transport in state {state}")]
    InvalidState {
        operation: &'static str,
        state: TransportState,
    },

    /// The local listener could not be bound.
    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// The backing process exited while the transport was running.
    #[error("backend terminated (exit code: {exit_code:?})")]
    BackendTerminated { exit_code: Option<i32> },

    /// The upstream endpoint could not be reached after bounded retries.
    #[error("backend {target} unreachable after {attempts} attempt(s)")]
    BackendUnreachable { target: String, attempts: u32 },

    /// A message violated the framing discipline.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A middleware refused the request. This is a policy outcome, not a fault.
    #[error("request rejected ({status}): {reason}")]
    MiddlewareRejected { status: u16, reason: String },

    /// The runtime handle failed to spawn, attach, or signal the workload.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error describes a deliberate policy decision rather than a failure.
    pub const fn is_policy_outcome(&self) -> bool {
        matches!(self, Self::MiddlewareRejected { .. })
    }
}

/// Framing violations detected while splitting a byte stream into messages.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A single frame exceeded the maximum size and was discarded.
    #[error("frame exceeds the {limit} byte limit")]
    Oversized { limit: usize },

    /// A complete frame was not a valid JSON value.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The stream failed while reading.
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from a [`WorkloadRuntime`](crate::ports::WorkloadRuntime) or
/// [`WorkloadProcess`](crate::ports::WorkloadProcess).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn workload: {0}")]
    SpawnFailed(String),

    #[error("workload did not expose {0}")]
    MissingStream(&'static str),

    #[error("failed to signal workload: {0}")]
    Signal(String),

    #[error("failed to wait for workload: {0}")]
    Wait(String),

    #[error("operation not supported by this runtime: {0}")]
    NotSupported(&'static str),
}

/// Errors from label lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("label {0} is not set")]
    Missing(&'static str),

    #[error("label {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}
