//! [`WorkloadProcess`] for a `tokio::process::Child`.
//!
//! The child is owned by a background task that reaps it and publishes the
//! exit status, so `wait` can be awaited concurrently with `terminate` and
//! `kill` through a shared reference.

use async_trait::async_trait;
use thv_core::{ExitInfo, RuntimeError, WorkloadProcess};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Handle to a spawned child process.
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    label: String,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Take ownership of `child` and start reaping it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(child: Child, label: impl Into<String>) -> Self {
        let pid = child.id();
        let label = label.into();
        let (exit_tx, exit) = watch::channel(None);
        let (kill, kill_rx) = mpsc::channel(1);
        tokio::spawn(own_child(child, label.clone(), kill_rx, exit_tx));
        Self {
            pid,
            label,
            exit,
            kill,
        }
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the child has been reaped.
    pub fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> Result<(), RuntimeError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| RuntimeError::Signal(format!("pid {pid} out of range")))?;
        match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            // Already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RuntimeError::Signal(e.to_string())),
        }
    }
}

/// Reap the child, killing it first if asked to (or if the handle is dropped).
async fn own_child(
    mut child: Child,
    label: String,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx.recv() => {
            debug!(process = %label, "Killing process");
            if let Err(e) = child.start_kill() {
                debug!(process = %label, error = %e, "Kill failed; process may have exited");
            }
            child.wait().await
        }
    };

    let info = match status {
        Ok(status) => ExitInfo::new(status.code()),
        Err(e) => {
            warn!(process = %label, error = %e, "Failed to reap process");
            ExitInfo::new(None)
        }
    };
    debug!(process = %label, code = ?info.code, "Process exited");
    exit_tx.send_replace(Some(info));
}

#[async_trait]
impl WorkloadProcess for ProcessHandle {
    fn id(&self) -> String {
        self.pid.map_or_else(
            || self.label.clone(),
            |pid| format!("{} (pid {pid})", self.label),
        )
    }

    async fn wait(&self) -> Result<ExitInfo, RuntimeError> {
        let mut exit = self.exit.clone();
        let info = *exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RuntimeError::Wait("process supervisor ended".to_string()))?;
        Ok(info.unwrap_or(ExitInfo::new(None)))
    }

    async fn terminate(&self) -> Result<(), RuntimeError> {
        if self.try_exit().is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            self.send_sigterm()
        }
        #[cfg(not(unix))]
        {
            // No SIGTERM equivalent
            self.kill().await
        }
    }

    async fn kill(&self) -> Result<(), RuntimeError> {
        // Full: a kill is already pending. Closed: already reaped.
        let _ = self.kill.try_send(());
        Ok(())
    }
}
