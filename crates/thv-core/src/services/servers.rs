//! Server service: lists and controls managed MCP servers through the lifecycle port.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::container::{McpServersConfig, ServerInfo};
use crate::ports::{LifecycleError, LifecycleManager};
use crate::transport::LOCALHOST_IPV4;

/// Errors from [`ServerService`], each naming the failed operation.
#[derive(Debug, Error)]
pub enum ServerServiceError {
    #[error("failed to list containers: {0}")]
    List(#[source] LifecycleError),

    #[error("failed to force stop container {name}: {source}")]
    Stop {
        name: String,
        #[source]
        source: LifecycleError,
    },

    #[error("failed to restart server {name}: {source}")]
    Restart {
        name: String,
        #[source]
        source: LifecycleError,
    },
}

/// Thin orchestration layer over a [`LifecycleManager`].
pub struct ServerService {
    manager: Arc<dyn LifecycleManager>,
    host: String,
}

impl ServerService {
    /// Create a service that publishes URLs on `127.0.0.1`.
    pub fn new(manager: Arc<dyn LifecycleManager>) -> Self {
        Self {
            manager,
            host: LOCALHOST_IPV4.to_string(),
        }
    }

    /// Publish URLs on a different host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Describe managed servers; `all` includes stopped ones.
    pub async fn list_servers(&self, all: bool) -> Result<Vec<ServerInfo>, ServerServiceError> {
        let containers = self
            .manager
            .list_containers(all)
            .await
            .map_err(ServerServiceError::List)?;

        debug!(count = containers.len(), all, "Listed managed containers");

        Ok(containers
            .iter()
            .map(|container| ServerInfo::from_container(container, &self.host))
            .collect())
    }

    /// Client configuration for servers of tool type `mcp`.
    pub async fn mcp_servers_config(&self, all: bool) -> Result<McpServersConfig, ServerServiceError> {
        let servers = self.list_servers(all).await?;
        Ok(McpServersConfig::from_servers(&servers))
    }

    /// Stop and remove a server.
    pub async fn stop_server(&self, name: &str) -> Result<(), ServerServiceError> {
        self.manager
            .delete_container(name, true)
            .await
            .map_err(|source| ServerServiceError::Stop {
                name: name.to_string(),
                source,
            })?;
        info!(server = %name, "Server stopped");
        Ok(())
    }

    /// Restart a server in place.
    pub async fn restart_server(&self, name: &str) -> Result<(), ServerServiceError> {
        self.manager
            .restart_container(name)
            .await
            .map_err(|source| ServerServiceError::Restart {
                name: name.to_string(),
                source,
            })?;
        info!(server = %name, "Server restarted");
        Ok(())
    }
}
