//! Lifecycle manager port: the component that owns managed instances.

use async_trait::async_trait;
use thiserror::Error;

use crate::container::ContainerInfo;

/// Errors reported by a [`LifecycleManager`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("lifecycle operation failed: {0}")]
    Operation(String),
}

/// Lists and controls managed instances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LifecycleManager: Send + Sync {
    /// List managed instances; `all` includes stopped ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, LifecycleError>;

    /// Remove an instance, stopping it first when `force` is set.
    async fn delete_container(&self, name: &str, force: bool) -> Result<(), LifecycleError>;

    /// Restart an instance in place.
    async fn restart_container(&self, name: &str) -> Result<(), LifecycleError>;
}
