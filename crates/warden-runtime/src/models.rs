//! Wire models for the Docker Engine API subset Warden uses.
//!
//! Field names follow the API's PascalCase JSON; only the fields Warden reads
//! or writes are modelled, everything else is ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `POST /containers/create`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub tty: bool,
    pub host_config: HostConfig,
}

/// Host-side settings of a container: mounts, limits and security options.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    /// Bind mounts in `host:container:mode` form.
    pub binds: Vec<String>,
    /// tmpfs mount point → mount options.
    pub tmpfs: BTreeMap<String, String>,
    pub readonly_rootfs: bool,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub network_mode: String,
    /// Memory ceiling in bytes.
    pub memory: i64,
    /// Memory + swap ceiling; equal to `memory` disables swap.
    pub memory_swap: i64,
    /// CFS scheduling period in microseconds.
    pub cpu_period: i64,
    /// CPU time allowed per period in microseconds.
    pub cpu_quota: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
}

/// Response of `POST /containers/create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateResponse {
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// One entry of `GET /containers/json`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    /// Creation time as seconds since the Unix epoch.
    pub created: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerSummary {
    /// Primary container name without the API's leading `/`.
    pub fn name(&self) -> Option<&str> {
        self.names.first().map(|n| n.trim_start_matches('/'))
    }
}

/// Response of `GET /containers/{id}/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(rename = "OOMKilled", default)]
    pub oom_killed: bool,
    #[serde(default)]
    pub exit_code: i64,
}

/// Body of `POST /containers/{id}/exec`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExecConfig {
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct IdResponse {
    pub id: String,
}

/// Response of `GET /exec/{id}/json`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInspect {
    #[serde(default)]
    pub running: bool,
    /// `None` while the process has not exited.
    #[serde(default)]
    pub exit_code: Option<i64>,
}

/// Response of `GET /containers/{id}/stats?stream=false`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ContainerStats {
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub pids_stats: PidsStats,
    #[serde(default)]
    pub cpu_stats: CpuStats,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PidsStats {
    #[serde(default)]
    pub current: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CpuUsage {
    /// Cumulative CPU time in nanoseconds.
    #[serde(default)]
    pub total_usage: u64,
}

/// Options for listing containers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    /// Include stopped containers.
    pub all: bool,
    /// Server-side name filter, an unanchored regular expression matched by the runtime.
    pub name: Option<String>,
    /// Server-side label filters, `key` or `key=value`.
    pub labels: Vec<String>,
}
