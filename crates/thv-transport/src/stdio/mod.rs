//! Stdio transport: bridges a workload's stdin/stdout to a local HTTP+SSE endpoint.

mod pumps;
mod routes;
mod sessions;

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thv_core::{TransportError, TransportEvent, TransportState, TransportType};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::lifecycle::{BackendOutcome, EventReporter, EventSink, Lifecycle, watch_backend};
use crate::server::{self, DRAIN_MARGIN};
use crate::transport::McpTransport;

pub use routes::KEEP_ALIVE_INTERVAL;
use routes::StdioState;
use sessions::SessionRegistry;

/// Tasks and handles that exist only while running.
struct Running {
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    server: JoinHandle<std::io::Result<()>>,
    watcher: JoinHandle<()>,
    pumps: Vec<JoinHandle<()>>,
}

/// Exposes a stdin/stdout MCP server on `GET /sse` + `POST /messages`.
pub struct StdioTransport {
    config: Config,
    lifecycle: Arc<Lifecycle>,
    events: EventSink,
    local_addr: OnceLock<SocketAddr>,
    running: Mutex<Option<Running>>,
}

impl StdioTransport {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            events: EventSink::new(),
            local_addr: OnceLock::new(),
            running: Mutex::new(None),
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Watch state changes, including the move to `Stopped` after a backend crash.
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.lifecycle.subscribe()
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("state", &self.lifecycle.current())
            .field("local_addr", &self.local_addr.get())
            .finish_non_exhaustive()
    }
}

/// Backend exited on its own: stop the instance and report it once.
async fn on_backend_exit(
    exit_code: Option<i32>,
    lifecycle_stopped: bool,
    reporter: &EventReporter,
    registry: &SessionRegistry,
    cancel: &CancellationToken,
) {
    if lifecycle_stopped {
        warn!(?exit_code, "Backend process exited unexpectedly");
        reporter.report(TransportEvent::BackendTerminated { exit_code });
    }
    // Let the stdout pump deliver what the backend wrote before exiting.
    if tokio::time::timeout(DRAIN_MARGIN, registry.closed()).await.is_err() {
        debug!("Backend stdout still open after exit; closing sessions");
    }
    registry.close_all();
    cancel.cancel();
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> TransportType {
        TransportType::Stdio
    }

    async fn setup(&self) -> Result<(), TransportError> {
        self.config.validate()?;
        server::validate_listen_address(&self.config.host, self.config.port).await?;
        self.lifecycle.configure()?;
        debug!(host = %self.config.host, port = self.config.port, "Stdio transport configured");
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        self.lifecycle.ensure_startable()?;

        let (listener, bound) = server::bind(&self.config.host, self.config.port).await?;
        let attachment = self.config.runtime.attach_stdio().await?;
        let process = attachment.process;

        let cancel = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new());
        let (stdin_tx, stdin_rx) = mpsc::channel(pumps::STDIN_QUEUE_CAPACITY);

        let mut tasks = vec![
            tokio::spawn(pumps::stdin_pump(attachment.stdin, stdin_rx, cancel.child_token())),
            tokio::spawn(pumps::stdout_pump(attachment.stdout, registry.clone())),
        ];
        if let Some(stderr) = attachment.stderr {
            tasks.push(tokio::spawn(pumps::stderr_drain(stderr, self.config.debug)));
        }

        let chain = self.config.middleware_chain();
        let router = routes::router(
            StdioState {
                registry: registry.clone(),
                stdin: stdin_tx,
            },
            &chain,
        );
        let server = server::spawn(listener, router, cancel.clone());

        let _ = self.local_addr.set(bound);
        let grace = self.config.grace_period;
        if let Err(e) = self.lifecycle.mark_running() {
            // Stopped while starting: undo everything that was launched.
            registry.close_all();
            cancel.cancel();
            tokio::spawn(watch_backend(process, cancel, grace));
            return Err(e);
        }

        let watcher = {
            let reporter = self.events.reporter();
            let registry = registry.clone();
            let cancel = cancel.clone();
            let lifecycle = Arc::clone(&self.lifecycle);
            tokio::spawn(async move {
                if let BackendOutcome::Exited(code) =
                    watch_backend(process, cancel.clone(), grace).await
                {
                    let stopped = lifecycle.stop_if_running();
                    on_backend_exit(code, stopped, &reporter, &registry, &cancel).await;
                }
            })
        };

        info!(
            address = %bound,
            middlewares = ?chain.names(),
            "Stdio transport running"
        );

        *running = Some(Running {
            cancel,
            registry,
            server,
            watcher,
            pumps: tasks,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let previous = self.lifecycle.stop();
        let Some(run) = self.running.lock().await.take() else {
            debug!(?previous, "Stdio transport stopped (nothing running)");
            return Ok(());
        };

        info!("Stopping stdio transport");
        run.registry.close_all();
        run.cancel.cancel();

        let grace = self.config.grace_period;
        let mut watcher = run.watcher;
        let (watched, ()) = tokio::join!(
            tokio::time::timeout(grace + DRAIN_MARGIN, &mut watcher),
            server::join(run.server, DRAIN_MARGIN),
        );
        if watched.is_err() {
            warn!("Backend shutdown overran the grace period; abandoning watcher");
            watcher.abort();
        }
        for pump in run.pumps {
            pump.abort();
        }
        info!("Stdio transport stopped");
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
