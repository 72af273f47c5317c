//! The Container Control API seam.

use crate::error::Result;
use crate::models::{
    ContainerInspect, ContainerSpec, ContainerStats, ContainerSummary, ExecConfig, ExecInspect,
    ListOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::time::Duration;

/// Raw exec output as it arrives from the runtime, still framed.
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

/// Operations Warden needs from a container runtime.
///
/// [`DockerClient`](crate::DockerClient) implements this against the Docker
/// Engine API. Error mapping contract for implementors:
///
/// - unknown container or exec id → [`RuntimeError::NotFound`](crate::RuntimeError::NotFound)
/// - stop/start that changes nothing → [`RuntimeError::NotModified`](crate::RuntimeError::NotModified)
/// - control socket unreachable → [`RuntimeError::Unavailable`](crate::RuntimeError::Unavailable)
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its runtime id.
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Ask the container to stop, killing it after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    async fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect>;

    /// Register a process to run inside a container and return the exec id.
    async fn create_exec(&self, container_id: &str, config: &ExecConfig) -> Result<String>;

    /// Start an exec and hand back its multiplexed output.
    ///
    /// The stream ends when the process closes its output. Dropping the
    /// stream aborts the underlying connection.
    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream>;

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect>;

    /// One-shot resource usage snapshot.
    async fn stats(&self, id: &str) -> Result<ContainerStats>;
}
