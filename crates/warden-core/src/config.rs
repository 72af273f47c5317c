//! Sandbox configuration types.

use crate::error::CoreError;
use crate::mounts::MountRequest;
use crate::resources::{cpu_quota, parse_memory};
use crate::security::NetworkMode;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum sandbox name length accepted by the runtime.
const MAX_NAME_LEN: usize = 128;

/// Read-only tools supplied by the tool manifest provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolMounts {
    /// Tools directory on the host.
    pub host_root: PathBuf,
    /// Where the tools appear inside the sandbox (default: `/tools`).
    pub container_root: PathBuf,
    /// Per-tool environment variables.
    pub env: BTreeMap<String, String>,
}

impl ToolMounts {
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
            container_root: PathBuf::from("/tools"),
            env: BTreeMap::new(),
        }
    }

    pub fn container_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.container_root = path.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Configuration for creating a sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Logical name, unique among active sandboxes.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Host directory holding the workload, mounted read-write at `workdir`.
    pub workload_dir: Option<PathBuf>,
    /// Working directory inside the sandbox (default: `/workspace`).
    pub workdir: PathBuf,
    /// Additional host mounts, validated by the mount policy.
    pub mounts: Vec<(PathBuf, MountRequest)>,
    /// Memory limit, e.g. `"2g"` (default: `"1g"`).
    pub memory: String,
    /// CPU count (default: 1).
    pub cpus: f64,
    /// Network attachment (default: none).
    pub network: NetworkMode,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub tools: Option<ToolMounts>,
    /// User to run as inside the sandbox.
    pub user: Option<String>,
    /// Maximum number of processes (default: 512).
    pub pids_limit: Option<i64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            image: String::new(),
            workload_dir: None,
            workdir: PathBuf::from("/workspace"),
            mounts: Vec::new(),
            memory: "1g".to_string(),
            cpus: 1.0,
            network: NetworkMode::None,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            tools: None,
            user: None,
            pids_limit: Some(512),
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// Mount paths are checked later by the mount policy; this covers
    /// everything that does not depend on the forbidden-path set.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_name(&self.name)?;
        if self.image.trim().is_empty() {
            return Err(CoreError::Configuration("image is required".into()));
        }
        if !self.workdir.is_absolute() {
            return Err(CoreError::Configuration(format!(
                "workdir {} must be absolute",
                self.workdir.display()
            )));
        }
        parse_memory(&self.memory)?;
        cpu_quota(self.cpus)?;
        self.network.validate()?;
        if let Some(limit) = self.pids_limit {
            if limit <= 0 {
                return Err(CoreError::Configuration("pids_limit must be > 0".into()));
            }
        }
        let tool_env = self.tools.iter().flat_map(|t| t.env.keys());
        for key in self.env.keys().chain(tool_env) {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(CoreError::Configuration(format!(
                    "invalid environment variable name {key:?}"
                )));
            }
        }
        Ok(())
    }
}

/// A unique sandbox name under `prefix`, e.g. `warden-3f2c...`.
///
/// Sandboxes named this way are found by the reaper's prefix sweep.
pub fn generate_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Names must start alphanumeric and contain only `[a-zA-Z0-9_.-]`.
pub(crate) fn validate_name(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest || name.len() > MAX_NAME_LEN {
        return Err(CoreError::Configuration(format!(
            "invalid sandbox name {name:?}"
        )));
    }
    Ok(())
}

/// Builder for SandboxConfig.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Set the sandbox name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Use a generated unique name under `prefix`.
    pub fn name_with_prefix(mut self, prefix: &str) -> Self {
        self.config.name = generate_name(prefix);
        self
    }

    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    /// Set the host workload directory.
    pub fn workload_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workload_dir = Some(path.into());
        self
    }

    /// Set the working directory inside the sandbox.
    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workdir = path.into();
        self
    }

    /// Add a host mount.
    pub fn mount(mut self, host: impl Into<PathBuf>, request: impl Into<MountRequest>) -> Self {
        self.config.mounts.push((host.into(), request.into()));
        self
    }

    /// Set the memory limit, e.g. `"512m"`.
    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.config.memory = memory.into();
        self
    }

    /// Set the CPU count.
    pub fn cpus(mut self, cpus: f64) -> Self {
        self.config.cpus = cpus;
        self
    }

    /// Set the network mode.
    pub fn network(mut self, network: NetworkMode) -> Self {
        self.config.network = network;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    /// Attach the read-only tools directory.
    pub fn tools(mut self, tools: ToolMounts) -> Self {
        self.config.tools = Some(tools);
        self
    }

    /// Run as this user inside the sandbox.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    /// Set the process count limit.
    pub fn pids_limit(mut self, limit: i64) -> Self {
        self.config.pids_limit = Some(limit);
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<SandboxConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings shared by every sandbox a lifecycle creates.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Grace period before a stopping sandbox is killed (default: 2s).
    pub stop_grace: Duration,
    /// Size of the no-exec `/tmp` tmpfs (default: `"256m"`).
    pub tmp_size: String,
    /// Size of the workload's writable temp area (default: `"1g"`).
    pub scratch_size: String,
    /// Long-running idle process kept alive between execs.
    pub idle_command: Vec<String>,
    /// Prefix for the labels Warden attaches (default: `"warden"`).
    pub label_prefix: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(2),
            tmp_size: "256m".to_string(),
            scratch_size: "1g".to_string(),
            idle_command: vec!["sleep".to_string(), "infinity".to_string()],
            label_prefix: "warden".to_string(),
        }
    }
}

impl LifecycleConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        parse_memory(&self.tmp_size)?;
        parse_memory(&self.scratch_size)?;
        if self.idle_command.is_empty() {
            return Err(CoreError::Configuration(
                "idle_command must not be empty".into(),
            ));
        }
        if self.label_prefix.is_empty() {
            return Err(CoreError::Configuration(
                "label_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Label key marking a container as created by Warden.
    pub fn managed_label(&self) -> String {
        format!("{}.managed", self.label_prefix)
    }

    /// Label key carrying the logical sandbox name.
    pub fn name_label(&self) -> String {
        format!("{}.name", self.label_prefix)
    }
}
