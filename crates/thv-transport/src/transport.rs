//! The polymorphic transport.

use std::net::SocketAddr;

use async_trait::async_trait;
use thv_core::{TransportError, TransportEvent, TransportState, TransportType};
use tokio::sync::mpsc;

use crate::sse::SseTransport;
use crate::stdio::StdioTransport;

/// Lifecycle contract shared by every transport variant.
///
/// Drive it `setup` → `start` → `stop`. A stopped transport is never
/// restarted; build a new one instead.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn kind(&self) -> TransportType;

    /// Validate configuration. No socket is bound and nothing is spawned.
    async fn setup(&self) -> Result<(), TransportError>;

    /// Bind the local listener, attach the backend and begin relaying.
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop relaying and release the backend. Idempotent, valid in any state.
    async fn stop(&self) -> Result<(), TransportError>;

    fn is_running(&self) -> bool;

    fn state(&self) -> TransportState;

    /// Address actually bound, once started.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Receiver for [`TransportEvent`]s. Returns `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// One transport instance, of either kind.
#[derive(Debug)]
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
}

impl Transport {
    fn inner(&self) -> &dyn McpTransport {
        match self {
            Self::Stdio(transport) => transport,
            Self::Sse(transport) => transport,
        }
    }
}

#[async_trait]
impl McpTransport for Transport {
    fn kind(&self) -> TransportType {
        self.inner().kind()
    }

    async fn setup(&self) -> Result<(), TransportError> {
        self.inner().setup().await
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.inner().start().await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.inner().stop().await
    }

    fn is_running(&self) -> bool {
        self.inner().is_running()
    }

    fn state(&self) -> TransportState {
        self.inner().state()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner().local_addr()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inner().take_events()
    }
}
