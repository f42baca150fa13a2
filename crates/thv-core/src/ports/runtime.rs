//! Workload runtime port.
//!
//! A transport never launches anything itself. It asks a [`WorkloadRuntime`]
//! for either the standard streams of a workload (stdio transports) or the
//! address a workload serves on (SSE transports), plus an optional
//! [`WorkloadProcess`] handle used for supervision and shutdown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::RuntimeError;

/// Writable end of a workload's stdin.
pub type WorkloadStdin = Box<dyn AsyncWrite + Send + Unpin>;
/// Readable end of a workload's stdout or stderr.
pub type WorkloadOutput = Box<dyn AsyncRead + Send + Unpin>;

/// How a workload exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    pub const fn new(code: Option<i32>) -> Self {
        Self { code }
    }

    pub const fn success(self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Handle to a running workload.
///
/// All methods take `&self`: `wait` is awaited by the backend watcher while
/// `terminate`/`kill` are issued from `stop`. `wait` may be called any number
/// of times and returns the same [`ExitInfo`] once the workload has exited.
#[async_trait]
pub trait WorkloadProcess: Send + Sync {
    /// Identifier for logs (pid, container id).
    fn id(&self) -> String;

    /// Wait for the workload to exit.
    async fn wait(&self) -> Result<ExitInfo, RuntimeError>;

    /// Ask the workload to exit (SIGTERM or equivalent).
    async fn terminate(&self) -> Result<(), RuntimeError>;

    /// Force the workload to exit.
    async fn kill(&self) -> Result<(), RuntimeError>;
}

impl fmt::Debug for dyn WorkloadProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadProcess")
            .field("id", &self.id())
            .finish()
    }
}

/// Standard streams of a workload attached for stdio bridging.
pub struct StdioAttachment {
    pub stdin: WorkloadStdin,
    pub stdout: WorkloadOutput,
    pub stderr: Option<WorkloadOutput>,
    pub process: Arc<dyn WorkloadProcess>,
}

impl fmt::Debug for StdioAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioAttachment")
            .field("process", &self.process.id())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// A workload that serves HTTP/SSE itself.
#[derive(Default)]
pub struct NetworkAttachment {
    /// Address the workload is reachable at, if the runtime knows it.
    pub address: Option<(String, u16)>,
    /// Process handle, if the runtime owns the workload's lifetime.
    pub process: Option<Arc<dyn WorkloadProcess>>,
}

impl fmt::Debug for NetworkAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkAttachment")
            .field("address", &self.address)
            .field("process", &self.process.as_ref().map(|p| p.id()))
            .finish()
    }
}

/// Starts or attaches to workloads on behalf of a transport.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Start (or attach to) the workload with piped standard streams.
    async fn attach_stdio(&self) -> Result<StdioAttachment, RuntimeError>;

    /// Start (or attach to) a workload that serves on the network.
    async fn attach_network(&self) -> Result<NetworkAttachment, RuntimeError>;
}

/// Stop a workload: terminate, wait up to `grace`, then kill.
///
/// Returns the exit status when one could be observed.
pub async fn shutdown_process(
    process: &dyn WorkloadProcess,
    grace: Duration,
) -> Result<ExitInfo, RuntimeError> {
    let id = process.id();

    if let Err(e) = process.terminate().await {
        warn!(process = %id, error = %e, "Failed to send terminate signal, killing");
        process.kill().await?;
        return process.wait().await;
    }

    match tokio::time::timeout(grace, process.wait()).await {
        Ok(result) => {
            debug!(process = %id, "Workload exited gracefully");
            result
        }
        Err(_) => {
            warn!(
                process = %id,
                grace_secs = grace.as_secs_f64(),
                "Workload did not exit within grace period, killing"
            );
            process.kill().await?;
            process.wait().await
        }
    }
}
