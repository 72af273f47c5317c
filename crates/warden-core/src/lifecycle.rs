//! Sandbox creation and teardown.

use crate::config::{LifecycleConfig, SandboxConfig};
use crate::error::{CoreError, Result};
use crate::exec::ExecChannel;
use crate::mounts::{MountPolicy, MountRequest, MountSpec};
use crate::resources::{parse_memory, ResourceLimits};
use crate::sandbox::{Sandbox, SandboxState};
use crate::security::{harden, workload_tmp_path};
use std::path::PathBuf;
use std::sync::Arc;
use warden_runtime::{ContainerRuntime, ContainerSpec, ContainerState, HostConfig, RuntimeError};

/// Outcome of a best-effort teardown. Teardown never fails the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    /// The container was removed by this call.
    Removed,
    /// The container was already gone or being removed by someone else.
    AlreadyGone,
    /// Removal failed; the error was logged and swallowed.
    Failed(String),
}

impl Teardown {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Point-in-time resource usage of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxStats {
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub pids: u64,
    /// Cumulative CPU time in nanoseconds.
    pub cpu_total_ns: u64,
}

/// Everything the runtime is sent for one sandbox, computed before any call.
#[derive(Debug, Clone)]
pub struct PreparedSandbox {
    pub spec: ContainerSpec,
    pub mounts: Vec<MountSpec>,
    pub limits: ResourceLimits,
}

/// Creates, stops and removes sandboxes through a [`ContainerRuntime`].
///
/// Holds no per-sandbox state; share it behind an `Arc` and call it from
/// as many tasks as needed. Calls for the same sandbox must be serialized
/// by the caller, which the `&mut Sandbox` receivers enforce for one handle.
pub struct SandboxLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    policy: MountPolicy,
    config: LifecycleConfig,
}

impl SandboxLifecycle {
    /// Create a lifecycle manager.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if `config` is invalid.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        policy: MountPolicy,
        config: LifecycleConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            stop_grace_ms = config.stop_grace.as_millis() as u64,
            tmp_size = %config.tmp_size,
            scratch_size = %config.scratch_size,
            "Creating sandbox lifecycle"
        );
        Ok(Self {
            runtime,
            policy,
            config,
        })
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn policy(&self) -> &MountPolicy {
        &self.policy
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// An exec channel bound to the same runtime.
    pub fn exec_channel(&self) -> ExecChannel {
        ExecChannel::new(Arc::clone(&self.runtime))
    }

    /// Validate a sandbox config and build the runtime descriptor.
    ///
    /// Makes no runtime calls. Mount, limit and network problems surface
    /// here, so nothing partially valid is ever submitted.
    pub fn prepare(&self, config: &SandboxConfig) -> Result<PreparedSandbox> {
        config.validate()?;
        let limits = ResourceLimits::parse(&config.memory, config.cpus)?;

        let mut requested: Vec<(PathBuf, MountRequest)> = Vec::new();
        if let Some(dir) = &config.workload_dir {
            requested.push((dir.clone(), MountRequest::read_write(&config.workdir)));
        }
        if let Some(tools) = &config.tools {
            requested.push((
                tools.host_root.clone(),
                MountRequest::read_only(&tools.container_root),
            ));
        }
        requested.extend(config.mounts.iter().cloned());
        let mounts = self.policy.build_mounts(requested)?;

        let mut env = std::collections::BTreeMap::new();
        if let Some(tools) = &config.tools {
            env.extend(tools.env.clone());
        }
        env.extend(config.env.clone());
        env.entry("TMPDIR".to_string())
            .or_insert_with(|| workload_tmp_path(&config.workdir).display().to_string());

        let mut labels = config.labels.clone();
        labels.insert(self.config.managed_label(), "true".to_string());
        labels.insert(self.config.name_label(), config.name.clone());

        let memory = i64::try_from(limits.memory_bytes).map_err(|_| {
            CoreError::Configuration(format!("memory limit {} is too large", config.memory))
        })?;
        let mut host = HostConfig {
            binds: mounts.iter().map(MountSpec::bind).collect(),
            network_mode: config.network.as_runtime_value().to_string(),
            memory,
            memory_swap: memory,
            cpu_period: limits.cpu_period,
            cpu_quota: limits.cpu_quota,
            pids_limit: config.pids_limit,
            init: Some(true),
            ..Default::default()
        };
        harden(
            &mut host,
            &config.workdir,
            parse_memory(&self.config.tmp_size)?,
            parse_memory(&self.config.scratch_size)?,
        );

        let spec = ContainerSpec {
            image: config.image.clone(),
            cmd: Some(self.config.idle_command.clone()),
            working_dir: Some(config.workdir.display().to_string()),
            user: config.user.clone(),
            env: env.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels,
            tty: false,
            host_config: host,
        };

        Ok(PreparedSandbox {
            spec,
            mounts,
            limits,
        })
    }

    /// Create and start a sandbox.
    ///
    /// This will:
    /// 1. Validate mounts, limits and network mode
    /// 2. Submit the hardened descriptor to the runtime
    /// 3. Start the container
    ///
    /// If the start fails, the created container is force-removed before
    /// the error is returned; no half-created sandbox is left behind.
    pub async fn create(&self, config: SandboxConfig) -> Result<Sandbox> {
        let start = std::time::Instant::now();
        let prepared = self.prepare(&config)?;
        tracing::info!(
            sandbox = %config.name,
            image = %config.image,
            memory_bytes = prepared.limits.memory_bytes,
            cpu_quota = prepared.limits.cpu_quota,
            mounts = prepared.mounts.len(),
            network = %config.network,
            "Creating sandbox"
        );

        let id = self
            .runtime
            .create_container(&config.name, &prepared.spec)
            .await
            .map_err(|e| {
                tracing::error!(sandbox = %config.name, error = %e, "Container creation failed");
                CoreError::from(e)
            })?;
        tracing::debug!(sandbox = %config.name, sandbox_id = %id, "Container created");

        let mut sandbox = Sandbox::new(
            id,
            config.name,
            config.image,
            config.workdir,
            prepared.mounts,
            prepared.limits,
            config.network,
        );

        match self.runtime.start_container(sandbox.id()).await {
            Ok(()) | Err(RuntimeError::NotModified(_)) => {}
            Err(e) => {
                tracing::error!(sandbox_id = %sandbox.id(), error = %e, "Container start failed, rolling back");
                match self.runtime.remove_container(sandbox.id(), true).await {
                    Ok(()) => {}
                    Err(re) if re.is_not_found() => {}
                    Err(re) => {
                        tracing::warn!(sandbox_id = %sandbox.id(), error = %re, "Rollback removal failed");
                    }
                }
                return Err(e.into());
            }
        }
        sandbox.transition(SandboxState::Running)?;

        tracing::info!(
            sandbox = %sandbox.name(),
            sandbox_id = %sandbox.id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox ready"
        );
        Ok(sandbox)
    }

    /// Stop a running sandbox within the configured grace period.
    ///
    /// Stopping an already stopped sandbox succeeds without a runtime call.
    pub async fn stop(&self, sandbox: &mut Sandbox) -> Result<()> {
        match sandbox.state() {
            SandboxState::Stopped => {
                tracing::debug!(sandbox_id = %sandbox.id(), "Sandbox already stopped");
                return Ok(());
            }
            SandboxState::Running => {}
            other => {
                return Err(CoreError::InvalidState {
                    expected: SandboxState::Running.to_string(),
                    actual: other.to_string(),
                });
            }
        }

        tracing::debug!(sandbox_id = %sandbox.id(), "Stopping sandbox");
        match self
            .runtime
            .stop_container(sandbox.id(), self.config.stop_grace)
            .await
        {
            Ok(()) => {}
            Err(RuntimeError::NotModified(_)) => {
                tracing::debug!(sandbox_id = %sandbox.id(), "Runtime reports sandbox already stopped");
            }
            Err(e) => return Err(e.into()),
        }
        sandbox.transition(SandboxState::Stopped)?;
        tracing::info!(sandbox_id = %sandbox.id(), "Sandbox stopped");
        Ok(())
    }

    /// Stop and remove a sandbox. Idempotent and never fails.
    pub async fn remove(&self, sandbox: &mut Sandbox) -> Teardown {
        if sandbox.state() == SandboxState::Removed {
            tracing::debug!(sandbox_id = %sandbox.id(), "Sandbox already removed");
            return Teardown::AlreadyGone;
        }

        let stop_first = sandbox.state() == SandboxState::Running;
        let outcome = self.teardown(sandbox.id(), stop_first).await;
        if !outcome.is_failed() {
            sandbox.mark_removed();
        }
        outcome
    }

    /// Stop and remove a container by runtime id or name.
    ///
    /// Used when no [`Sandbox`] handle exists, e.g. by the reaper.
    pub async fn remove_container(&self, id: &str) -> Teardown {
        self.teardown(id, true).await
    }

    async fn teardown(&self, id: &str, stop_first: bool) -> Teardown {
        let start = std::time::Instant::now();
        tracing::info!(sandbox_id = %id, "Removing sandbox");

        if stop_first {
            match self.runtime.stop_container(id, self.config.stop_grace).await {
                Ok(()) | Err(RuntimeError::NotModified(_)) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(sandbox_id = %id, "Sandbox not found while stopping, nothing to remove");
                    return Teardown::AlreadyGone;
                }
                Err(e) => {
                    tracing::warn!(sandbox_id = %id, error = %e, "Stop failed, forcing removal");
                }
            }
        }

        match self.runtime.remove_container(id, true).await {
            Ok(()) => {
                tracing::info!(
                    sandbox_id = %id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Sandbox removed"
                );
                Teardown::Removed
            }
            Err(e) if e.is_not_found() || e.is_removal_in_progress() => {
                tracing::warn!(sandbox_id = %id, error = %e, "Sandbox already gone");
                Teardown::AlreadyGone
            }
            Err(e) => {
                tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove sandbox");
                Teardown::Failed(e.to_string())
            }
        }
    }

    /// The runtime's current view of a sandbox.
    pub async fn status(&self, sandbox: &Sandbox) -> Result<ContainerState> {
        let inspect = self.runtime.inspect_container(sandbox.id()).await?;
        Ok(inspect.state)
    }

    /// Resource usage snapshot of a running sandbox.
    pub async fn stats(&self, sandbox: &Sandbox) -> Result<SandboxStats> {
        sandbox.ensure_running()?;
        let stats = self.runtime.stats(sandbox.id()).await?;
        Ok(SandboxStats {
            memory_usage_bytes: stats.memory_stats.usage,
            memory_limit_bytes: stats.memory_stats.limit,
            pids: stats.pids_stats.current,
            cpu_total_ns: stats.cpu_stats.cpu_usage.total_usage,
        })
    }
}
