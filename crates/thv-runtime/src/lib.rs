//! Runs MCP workloads as local child processes.
//!
//! [`ProcessRuntime`] implements [`thv_core::WorkloadRuntime`] on top of
//! `tokio::process`, so either transport can front a plain command.

#![deny(unused_crate_dependencies)]

// Used by the integration tests.
#[cfg(test)]
use tempfile as _;
// Unit tests using it are Unix-only.
#[cfg(all(test, not(unix)))]
use tokio_test as _;

pub mod process;

pub use process::{ProcessHandle, ProcessRuntime};
