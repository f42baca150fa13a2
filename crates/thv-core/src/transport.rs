//! Transport kinds, lifecycle states, and events reported to the owner.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Loopback address used for local listeners and published URLs.
pub const LOCALHOST_IPV4: &str = "127.0.0.1";

/// Maximum size of a single framed message (10 MiB).
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Default time a backend gets to exit after SIGTERM before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The supported transport kinds.
///
/// Parsing is strict: anything other than `stdio` or `sse` is rejected with
/// [`TransportError::UnsupportedTransport`]. Deserialization goes through the
/// same parser, so configuration files cannot fall back to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportType {
    /// Bridge a process's standard streams to a local HTTP/SSE endpoint.
    Stdio,
    /// Reverse-proxy a local endpoint to an upstream HTTP/SSE endpoint.
    Sse,
}

impl TransportType {
    /// Lowercase wire name, as used in labels and on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            _ => Err(TransportError::UnsupportedTransport(s.to_string())),
        }
    }
}

impl TryFrom<String> for TransportType {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransportType> for String {
    fn from(value: TransportType) -> Self {
        value.as_str().to_string()
    }
}

/// Lifecycle state of a transport instance.
///
/// `Created → Configured → Running → Stopped`. `Stopped` is terminal; a
/// stopped transport is discarded, never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Created,
    Configured,
    Running,
    Stopped,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Conditions a running transport reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// The backing process exited; the transport has stopped itself.
    BackendTerminated { exit_code: Option<i32> },
    /// Upstream connection attempts were exhausted; the transport keeps running.
    BackendUnreachable { target: String, attempts: u32 },
    /// A request reached the upstream again after an outage.
    BackendRecovered { target: String },
}
