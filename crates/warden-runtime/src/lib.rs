//! # warden-runtime
//!
//! Container Control API layer for Warden sandboxes.
//! Talks to a Docker-compatible daemon over its local Unix socket and
//! decodes the multiplexed output stream of exec'd processes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use warden_runtime::{ContainerRuntime, DockerClient, ListOptions};
//!
//! # async fn example() -> warden_runtime::Result<()> {
//! let docker = DockerClient::new("/var/run/docker.sock");
//! docker.ping().await?;
//!
//! let containers = docker
//!     .list_containers(&ListOptions { all: true, ..Default::default() })
//!     .await?;
//! for c in containers {
//!     println!("{} {:?}", c.id, c.name());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Runtime seam**: [`ContainerRuntime`] trait, implemented by [`DockerClient`]
//! - **Error mapping**: HTTP 304/404/409 and socket failures become typed [`RuntimeError`]s
//! - **Stream codec**: [`mux::FrameDecoder`] strips the 8-byte frame headers

mod docker;
mod error;
mod models;
pub mod mux;
mod runtime;

pub use docker::{DockerClient, DEFAULT_SOCKET_PATH};
pub use error::{Result, RuntimeError};
pub use models::{
    ContainerInspect, ContainerSpec, ContainerState, ContainerStats, ContainerSummary, CpuStats,
    CpuUsage, ExecConfig, ExecInspect, HostConfig, ListOptions, MemoryStats, PidsStats,
};
pub use runtime::{ContainerRuntime, OutputStream};
