//! Configuration for the reaper daemon.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;
use warden_core::ForbiddenPaths;
use warden_runtime::DEFAULT_SOCKET_PATH;

/// Configuration for the reaper daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaperConfig {
    /// Path to the container runtime's control socket.
    pub docker_socket: PathBuf,

    /// Pin the Docker Engine API version (default: negotiated by the daemon).
    pub api_version: Option<String>,

    /// Only sandboxes whose name starts with this are considered (default: `warden-`).
    pub prefix: String,

    /// Sandboxes older than this are removed (default: 24h).
    pub max_age: Duration,

    /// Time between sweeps (default: 10 minutes).
    pub interval: Duration,

    /// Run a single sweep and exit (default: false).
    pub once: bool,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("name prefix must not be empty")]
    EmptyPrefix,

    #[error("max age must be greater than zero")]
    ZeroMaxAge,

    #[error("sweep interval must be greater than zero")]
    ZeroInterval,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            docker_socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            api_version: None,
            prefix: "warden-".to_string(),
            max_age: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(600),
            once: false,
        }
    }
}

impl ReaperConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WARDEN_DOCKER_SOCKET` | `/var/run/docker.sock` |
    /// | `WARDEN_DOCKER_API_VERSION` | unset |
    /// | `WARDEN_REAPER_PREFIX` | `warden-` |
    /// | `WARDEN_REAPER_MAX_AGE_HOURS` | `24` |
    /// | `WARDEN_REAPER_INTERVAL_SECS` | `600` |
    /// | `WARDEN_REAPER_ONCE` | `false` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        Self {
            docker_socket: lookup("WARDEN_DOCKER_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(default.docker_socket),
            api_version: lookup("WARDEN_DOCKER_API_VERSION").filter(|v| !v.is_empty()),
            prefix: lookup("WARDEN_REAPER_PREFIX").unwrap_or(default.prefix),
            max_age: lookup("WARDEN_REAPER_MAX_AGE_HOURS")
                .and_then(|v| v.parse::<u64>().ok())
                .and_then(|h| h.checked_mul(3600))
                .map(Duration::from_secs)
                .unwrap_or(default.max_age),
            interval: lookup("WARDEN_REAPER_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.interval),
            once: lookup("WARDEN_REAPER_ONCE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default.once),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            // An empty prefix would match every container on the host.
            return Err(ConfigError::EmptyPrefix);
        }
        if self.max_age.is_zero() {
            return Err(ConfigError::ZeroMaxAge);
        }
        if self.interval.is_zero() && !self.once {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if !self.docker_socket.exists() {
            tracing::warn!("Docker socket not found: {:?}", self.docker_socket);
        }
    }

    /// Forbidden paths of a standard Warden install.
    ///
    /// The reaper never creates sandboxes, so these only satisfy the
    /// lifecycle's constructor.
    pub fn forbidden_paths(&self) -> ForbiddenPaths {
        ForbiddenPaths::new(
            "/opt/warden",
            "/etc/warden/credentials.json",
            "/etc/warden",
            "/var/lib/warden",
        )
    }
}
