//! `thv-proxy`: runs one MCP server behind a local HTTP+SSE transport.

#![deny(unused_crate_dependencies)]

// Used by main.rs
use dotenvy as _;
use tracing_subscriber as _;

// Used by the integration tests.
#[cfg(test)]
use reqwest as _;
#[cfg(test)]
use serde_json as _;

mod parser;

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use thv_core::{TransportEvent, mcp_server_url};
use thv_transport::{McpTransport, TransportFactory};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use parser::Cli;

/// Why the proxy stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Ctrl-C or SIGTERM.
    Signal,
    /// The backend exited on its own.
    BackendTerminated { exit_code: Option<i32> },
}

impl Shutdown {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Signal => ExitCode::SUCCESS,
            Self::BackendTerminated { .. } => ExitCode::FAILURE,
        }
    }
}

/// URL clients should use for a transport listening on `addr`.
pub fn published_url(addr: SocketAddr, name: &str) -> String {
    mcp_server_url(&addr.ip().to_string(), addr.port(), name)
}

/// Start the transport, print its URL and serve until told to stop.
pub async fn run(cli: Cli) -> anyhow::Result<Shutdown> {
    let transport = TransportFactory::new().create(cli.config()?)?;
    let mut events = transport
        .take_events()
        .context("transport events already taken")?;

    transport.setup().await?;
    transport.start().await?;
    let addr = transport
        .local_addr()
        .context("transport did not report its address")?;

    info!(kind = %transport.kind(), %addr, server = %cli.server_name(), "Proxy ready");
    println!("{}", published_url(addr, &cli.server_name()));

    let reason = tokio::select! {
        () = shutdown_signal() => Shutdown::Signal,
        reason = backend_exit(&mut events) => reason,
    };
    info!(?reason, "Shutting down");
    transport.stop().await?;
    Ok(reason)
}

/// Log transport events until the backend terminates.
async fn backend_exit(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Shutdown {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::BackendTerminated { exit_code } => {
                warn!(?exit_code, "Backend terminated");
                return Shutdown::BackendTerminated { exit_code };
            }
            TransportEvent::BackendUnreachable { target, attempts } => {
                warn!(%target, attempts, "Backend unreachable");
            }
            TransportEvent::BackendRecovered { target } => {
                info!(%target, "Backend reachable again");
            }
        }
    }
    std::future::pending().await
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
