//! SSE transport: reverse-proxies a local endpoint to a workload that already
//! speaks HTTP+SSE on an internal address.

mod events;
mod proxy;

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use thv_core::{
    NetworkAttachment, TransportError, TransportEvent, TransportState, TransportType,
    WorkloadProcess, authority, shutdown_process,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::lifecycle::{BackendOutcome, EventSink, Lifecycle, watch_backend};
use crate::middleware::{MiddlewareChain, apply_chain};
use crate::server::{self, DRAIN_MARGIN, health};
use crate::transport::McpTransport;

pub use events::{EventFramer, frame_events};
pub use proxy::RetryPolicy;
use proxy::Upstream;

struct Running {
    cancel: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
    watcher: Option<JoinHandle<()>>,
}

/// Exposes an HTTP/SSE MCP server through a local reverse proxy.
pub struct SseTransport {
    config: Config,
    retry: RetryPolicy,
    lifecycle: Arc<Lifecycle>,
    events: EventSink,
    local_addr: OnceLock<SocketAddr>,
    target: OnceLock<String>,
    running: Mutex<Option<Running>>,
}

impl SseTransport {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            retry: RetryPolicy::default(),
            lifecycle: Arc::new(Lifecycle::new()),
            events: EventSink::new(),
            local_addr: OnceLock::new(),
            target: OnceLock::new(),
            running: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Upstream `host:port`, once started.
    pub fn target(&self) -> Option<&str> {
        self.target.get().map(String::as_str)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.lifecycle.subscribe()
    }

    /// Explicit target wins; otherwise whatever the runtime reported.
    fn resolve_target(&self, attachment: &NetworkAttachment) -> Result<String, TransportError> {
        if self.config.target_port != 0 {
            return Ok(authority(&self.config.target_host, self.config.target_port));
        }
        match &attachment.address {
            Some((host, port)) if *port != 0 => Ok(authority(host, *port)),
            _ => Err(TransportError::InvalidConfig(
                "no target port configured and the runtime reported no address".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("state", &self.lifecycle.current())
            .field("local_addr", &self.local_addr.get())
            .field("target", &self.target.get())
            .finish_non_exhaustive()
    }
}

/// Release a process started for an instance that failed to come up.
async fn abandon(process: Option<Arc<dyn WorkloadProcess>>, grace: std::time::Duration) {
    if let Some(process) = process
        && let Err(e) = shutdown_process(process.as_ref(), grace).await
    {
        warn!(process = %process.id(), error = %e, "Failed to shut down backend after start error");
    }
}

/// Every path and method goes upstream; `/health` answers locally.
fn router(upstream: Arc<Upstream>, chain: &MiddlewareChain) -> Router {
    let mut proxied = Router::new().fallback(proxy::proxy);
    if !chain.is_empty() {
        proxied = proxied.layer(axum::middleware::from_fn_with_state(
            chain.clone(),
            apply_chain,
        ));
    }
    Router::new()
        .route("/health", get(health))
        .fallback_service(proxied.with_state(upstream))
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportType {
        TransportType::Sse
    }

    async fn setup(&self) -> Result<(), TransportError> {
        self.config.validate()?;
        server::validate_listen_address(&self.config.host, self.config.port).await?;
        self.lifecycle.configure()?;
        debug!(host = %self.config.host, port = self.config.port, "SSE transport configured");
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        self.lifecycle.ensure_startable()?;
        let grace = self.config.grace_period;

        let (listener, bound) = server::bind(&self.config.host, self.config.port).await?;
        let attachment = self.config.runtime.attach_network().await?;

        let target = match self.resolve_target(&attachment) {
            Ok(target) => target,
            Err(e) => {
                abandon(attachment.process, grace).await;
                return Err(e);
            }
        };
        let client = match proxy::build_client(self.retry.connect_timeout) {
            Ok(client) => client,
            Err(e) => {
                abandon(attachment.process, grace).await;
                return Err(TransportError::InvalidConfig(format!(
                    "failed to build upstream client: {e}"
                )));
            }
        };

        let cancel = CancellationToken::new();
        let upstream = Arc::new(Upstream::new(
            client,
            target.clone(),
            self.retry,
            self.events.reporter(),
            cancel.clone(),
        ));
        let chain = self.config.middleware_chain();
        let server = server::spawn(listener, router(upstream, &chain), cancel.clone());

        let _ = self.local_addr.set(bound);
        let _ = self.target.set(target.clone());
        if let Err(e) = self.lifecycle.mark_running() {
            cancel.cancel();
            abandon(attachment.process, grace).await;
            return Err(e);
        }

        let watcher = attachment.process.map(|process| {
            let reporter = self.events.reporter();
            let cancel = cancel.clone();
            let lifecycle = Arc::clone(&self.lifecycle);
            tokio::spawn(async move {
                if let BackendOutcome::Exited(exit_code) =
                    watch_backend(process, cancel.clone(), grace).await
                {
                    if lifecycle.stop_if_running() {
                        warn!(?exit_code, "Backend process exited unexpectedly");
                        reporter.report(TransportEvent::BackendTerminated { exit_code });
                    }
                    cancel.cancel();
                }
            })
        });

        info!(
            address = %bound,
            upstream = %target,
            middlewares = ?chain.names(),
            "SSE transport running"
        );

        *running = Some(Running {
            cancel,
            server,
            watcher,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let previous = self.lifecycle.stop();
        let Some(run) = self.running.lock().await.take() else {
            debug!(?previous, "SSE transport stopped (nothing running)");
            return Ok(());
        };

        info!("Stopping SSE transport");
        run.cancel.cancel();

        let grace = self.config.grace_period;
        let watch = async {
            if let Some(mut watcher) = run.watcher
                && tokio::time::timeout(grace + DRAIN_MARGIN, &mut watcher)
                    .await
                    .is_err()
            {
                warn!("Backend shutdown overran the grace period; abandoning watcher");
                watcher.abort();
            }
        };
        tokio::join!(watch, server::join(run.server, DRAIN_MARGIN));
        info!("SSE transport stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.current() == TransportState::Running
    }

    fn state(&self) -> TransportState {
        self.lifecycle.current()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}
