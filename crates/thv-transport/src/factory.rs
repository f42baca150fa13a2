//! Builds a [`Transport`] from a [`Config`].

use thv_core::{TransportError, TransportType};
use tracing::debug;

use crate::config::Config;
use crate::sse::SseTransport;
use crate::stdio::StdioTransport;
use crate::transport::Transport;

/// Stateless factory for transports.
///
/// Creation performs no I/O: nothing is bound or spawned until `setup` and
/// `start`. Unknown kind strings are rejected earlier, when they are parsed
/// into a [`TransportType`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportFactory;

impl TransportFactory {
    pub const fn new() -> Self {
        Self
    }

    pub fn create(&self, config: Config) -> Result<Transport, TransportError> {
        config.validate()?;
        debug!(kind = %config.transport_type, "Creating transport");
        let transport = match config.transport_type {
            TransportType::Stdio => Transport::Stdio(StdioTransport::new(config)),
            TransportType::Sse => Transport::Sse(SseTransport::new(config)),
        };
        Ok(transport)
    }

    /// Parse `kind` and create the matching transport.
    pub fn create_named(&self, kind: &str, mut config: Config) -> Result<Transport, TransportError> {
        config.transport_type = kind.parse()?;
        self.create(config)
    }
}
