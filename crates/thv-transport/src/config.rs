//! Transport configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thv_core::{DEFAULT_GRACE_PERIOD, LOCALHOST_IPV4, TransportError, TransportType, WorkloadRuntime};

use crate::middleware::{Middleware, MiddlewareChain};

/// Everything a transport needs, supplied by the caller.
///
/// Nothing here is read from the environment; the binary or embedding
/// application decides where values come from.
#[derive(Clone)]
pub struct Config {
    /// Which transport to build.
    pub transport_type: TransportType,
    /// Local listen host.
    pub host: String,
    /// Local listen port (0 picks a free port).
    pub port: u16,
    /// Upstream host for SSE transports.
    pub target_host: String,
    /// Upstream port for SSE transports (0 asks the runtime).
    pub target_port: u16,
    /// Starts or attaches to the workload.
    pub runtime: Arc<dyn WorkloadRuntime>,
    /// Log backend stderr at `info` instead of `debug`.
    pub debug: bool,
    /// Applied to local requests; the first entry is outermost.
    pub middlewares: Vec<Arc<dyn Middleware>>,
    /// Time the backend gets after SIGTERM before it is killed.
    pub grace_period: Duration,
}

impl Config {
    pub fn new(transport_type: TransportType, runtime: Arc<dyn WorkloadRuntime>) -> Self {
        Self {
            transport_type,
            host: LOCALHOST_IPV4.to_string(),
            port: 0,
            target_host: LOCALHOST_IPV4.to_string(),
            target_port: 0,
            runtime,
            debug: false,
            middlewares: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_target_host(mut self, host: impl Into<String>) -> Self {
        self.target_host = host.into();
        self
    }

    #[must_use]
    pub const fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = port;
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Append a middleware; it runs inside those added before it.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    #[must_use]
    pub fn with_middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares;
        self
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Upper bound on how long `stop` may block for this configuration.
    pub fn stop_budget(&self) -> Duration {
        self.grace_period + crate::server::DRAIN_MARGIN * 2
    }

    /// Compose the middleware list into a chain.
    pub fn middleware_chain(&self) -> MiddlewareChain {
        MiddlewareChain::new(self.middlewares.clone())
    }

    /// Checks that need no I/O.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.trim().is_empty() {
            return Err(TransportError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.transport_type == TransportType::Sse && self.target_host.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "target host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let middlewares: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("Config")
            .field("transport_type", &self.transport_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("debug", &self.debug)
            .field("middlewares", &middlewares)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}
