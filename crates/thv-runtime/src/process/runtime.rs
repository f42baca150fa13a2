//! [`WorkloadRuntime`] that runs a command as a local child process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thv_core::{NetworkAttachment, RuntimeError, StdioAttachment, WorkloadRuntime};
use tokio::process::{Child, Command};
use tracing::info;

use super::ProcessHandle;

/// Launches `command args…` for each attach.
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    address: Option<(String, u16)>,
}

impl ProcessRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            address: None,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Address a network workload serves on, reported by `attach_network`.
    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.address = Some((host.into(), port));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn spawn(&self, mut cmd: Command) -> Result<Child, RuntimeError> {
        let child = cmd
            .spawn()
            .map_err(|e| RuntimeError::SpawnFailed(format!("{}: {e}", self.program)))?;
        info!(
            program = %self.program,
            args = ?self.args,
            pid = ?child.id(),
            "Started workload process"
        );
        Ok(child)
    }
}

#[async_trait]
impl WorkloadRuntime for ProcessRuntime {
    async fn attach_stdio(&self) -> Result<StdioAttachment, RuntimeError> {
        let mut cmd = self.command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = self.spawn(cmd)?;

        // Streams are taken before the child moves into its handle; a
        // missing one drops (and so kills) the child.
        let stdin = child.stdin.take().ok_or(RuntimeError::MissingStream("stdin"))?;
        let stdout = child.stdout.take().ok_or(RuntimeError::MissingStream("stdout"))?;
        let stderr = child.stderr.take();

        Ok(StdioAttachment {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as thv_core::WorkloadOutput),
            process: Arc::new(ProcessHandle::new(child, self.program.clone())),
        })
    }

    async fn attach_network(&self) -> Result<NetworkAttachment, RuntimeError> {
        let mut cmd = self.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let child = self.spawn(cmd)?;

        Ok(NetworkAttachment {
            address: self.address.clone(),
            process: Some(Arc::new(ProcessHandle::new(child, self.program.clone()))),
        })
    }
}
