//! # warden-core
//!
//! Sandbox orchestration layer for Warden workload sandboxes.
//!
//! This crate creates hardened, resource-limited containers for untrusted
//! workloads, runs commands in them, and tears them down again, including
//! sandboxes whose owner disappeared.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    warden-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  MountPolicy    │────▶│  ForbiddenPaths          │   │
//! │  │ - build_mounts()│     │  (install, creds, ...)   │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │ MountSpec                                    │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │SandboxLifecycle │────▶│  Sandbox                 │   │
//! │  │  - create()     │     │  (id, limits, state)     │   │
//! │  │  - stop()       │     └──────────────────────────┘   │
//! │  │  - remove()     │                │                   │
//! │  └─────────────────┘                ▼                   │
//! │           ▲              ┌──────────────────────────┐   │
//! │  ┌─────────────────┐     │  ExecChannel             │   │
//! │  │ SandboxReaper   │     │  - run()                 │   │
//! │  │  - sweep()      │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!                           │ ContainerRuntime
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  warden-runtime                          │
//! │           Docker Engine API over a Unix socket           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_core::{
//!     ExecRequest, ForbiddenPaths, LifecycleConfig, MountPolicy, SandboxConfig,
//!     SandboxLifecycle,
//! };
//! use warden_runtime::DockerClient;
//!
//! # async fn example() -> warden_core::Result<()> {
//! let policy = MountPolicy::new(ForbiddenPaths::new(
//!     "/opt/warden",
//!     "/etc/warden/credentials.json",
//!     "/etc/warden",
//!     "/var/lib/warden/tasks",
//! ));
//! let lifecycle = SandboxLifecycle::new(
//!     Arc::new(DockerClient::default()),
//!     policy,
//!     LifecycleConfig::default(),
//! )?;
//!
//! let config = SandboxConfig::builder()
//!     .name("sandbox-1")
//!     .image("alpine:3.20")
//!     .workload_dir("/srv/work/task-1")
//!     .memory("2g")
//!     .cpus(1.0)
//!     .build()?;
//!
//! let mut sandbox = lifecycle.create(config).await?;
//! let result = lifecycle
//!     .exec_channel()
//!     .run(&sandbox, ExecRequest::new("ls -la"))
//!     .await?;
//! println!("{}", result.output);
//!
//! lifecycle.remove(&mut sandbox).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Mount policy**: Host paths near Warden's own files are refused before any container exists
//! - **Hardening**: Read-only rootfs, dropped capabilities, no-new-privileges, no network by default
//! - **Atomic creation**: A container that fails to start is removed before the error returns
//! - **Streaming exec**: Live output chunks to a channel while the full output is collected
//! - **Idempotent teardown**: `remove()` never fails; races with other removers are tolerated
//! - **Reaper**: Age-based cleanup of orphaned sandboxes, one-shot or in the background

mod config;
mod error;
mod exec;
mod lifecycle;
mod mounts;
mod reaper;
mod resources;
mod sandbox;
mod security;

pub use config::{generate_name, LifecycleConfig, SandboxConfig, SandboxConfigBuilder, ToolMounts};
pub use error::{CoreError, Result};
pub use exec::{ExecChannel, ExecRequest, ExecutionResult, DEFAULT_MAX_OUTPUT_BYTES};
pub use lifecycle::{PreparedSandbox, SandboxLifecycle, SandboxStats, Teardown};
pub use mounts::{ForbiddenPaths, MountMode, MountPolicy, MountRequest, MountSpec};
pub use reaper::{ReaperHandle, SandboxReaper, SweepReport};
pub use resources::{cpu_quota, parse_cpus, parse_memory, ResourceLimits, CPU_PERIOD_US};
pub use sandbox::{Sandbox, SandboxState};
pub use security::{
    harden, workload_tmp_path, NetworkMode, DROPPED_CAPABILITIES, NO_NEW_PRIVILEGES,
    RETAINED_CAPABILITIES, SCRATCH_TMP_PATH, WORKLOAD_TMP_DIR,
};
