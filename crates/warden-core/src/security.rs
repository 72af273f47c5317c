//! Hardening applied to every sandbox regardless of caller input.

use crate::error::{CoreError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use warden_runtime::HostConfig;

/// Capabilities removed from every sandbox.
pub const DROPPED_CAPABILITIES: &[&str] = &[
    "NET_ADMIN",
    "NET_RAW",
    "SYS_ADMIN",
    "SYS_MODULE",
    "SYS_PTRACE",
    "SYS_TIME",
    "AUDIT_CONTROL",
    "AUDIT_WRITE",
    "MAC_ADMIN",
    "MAC_OVERRIDE",
    "SETUID",
    "SETGID",
    "SETPCAP",
    "SYS_RAWIO",
    "SYS_CHROOT",
    "MKNOD",
];

/// Capabilities left in place for file ownership/permission changes and signalling.
pub const RETAINED_CAPABILITIES: &[&str] = &["CHOWN", "DAC_OVERRIDE", "FOWNER", "FSETID", "KILL"];

pub const NO_NEW_PRIVILEGES: &str = "no-new-privileges";

/// Fixed mount point of the small no-exec scratch tmpfs.
pub const SCRATCH_TMP_PATH: &str = "/tmp";

/// Name of the workload's own writable temp area, relative to its workdir.
pub const WORKLOAD_TMP_DIR: &str = ".tmp";

/// Network attachment of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// No network interfaces besides loopback.
    #[default]
    None,
    /// The runtime's default bridge network.
    Bridge,
    /// A user-defined network by name.
    Named(String),
}

impl NetworkMode {
    /// Value passed to the runtime's `NetworkMode` field.
    pub fn as_runtime_value(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Bridge => "bridge",
            Self::Named(name) => name,
        }
    }

    /// Refuse modes that would share a namespace with the host or another container.
    pub fn validate(&self) -> Result<()> {
        let Self::Named(name) = self else {
            return Ok(());
        };
        if name.is_empty() {
            return Err(CoreError::Configuration(
                "network name must not be empty".into(),
            ));
        }
        if name == "host" || name.starts_with("container:") {
            return Err(CoreError::security(
                format!("network:{name}"),
                "network mode shares a namespace outside the sandbox",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_runtime_value())
    }
}

/// Path of the workload's larger writable temp area inside the container.
pub fn workload_tmp_path(workdir: &Path) -> PathBuf {
    workdir.join(WORKLOAD_TMP_DIR)
}

/// Apply the fixed security contract to a host config.
///
/// Overwrites anything the caller may have set for the same fields.
pub fn harden(host: &mut HostConfig, workdir: &Path, tmp_bytes: u64, scratch_bytes: u64) {
    host.readonly_rootfs = true;

    host.tmpfs.insert(
        SCRATCH_TMP_PATH.to_string(),
        format!("rw,noexec,nosuid,nodev,size={tmp_bytes}"),
    );
    host.tmpfs.insert(
        workload_tmp_path(workdir).display().to_string(),
        format!("rw,exec,nosuid,nodev,size={scratch_bytes}"),
    );

    host.cap_drop = DROPPED_CAPABILITIES.iter().map(|c| c.to_string()).collect();

    if !host.security_opt.iter().any(|o| o == NO_NEW_PRIVILEGES) {
        host.security_opt.push(NO_NEW_PRIVILEGES.to_string());
    }
}
