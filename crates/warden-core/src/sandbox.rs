//! Sandbox handle and lifecycle state.

use crate::error::CoreError;
use crate::mounts::MountSpec;
use crate::resources::ResourceLimits;
use crate::security::NetworkMode;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

/// Current state of a sandbox.
///
/// ```text
/// Created ──▶ Running ──▶ Stopped ──▶ Removed
///                │                       ▲
///                └───────────────────────┘  (force remove)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Container exists but has not been started.
    Created,
    /// Sandbox is ready for commands.
    Running,
    /// Main process has exited; the container still exists.
    Stopped,
    /// Container is gone.
    Removed,
}

impl SandboxState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Created, Running) | (Running, Stopped) | (Stopped, Removed) | (Running, Removed)
        )
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Removed => write!(f, "Removed"),
        }
    }
}

/// A sandbox created by [`SandboxLifecycle`](crate::SandboxLifecycle).
///
/// Mounts, limits and network mode are fixed at creation. Only the
/// lifecycle and the reaper move the state forward; exec borrows the
/// handle immutably.
#[derive(Debug, Clone)]
pub struct Sandbox {
    id: String,
    name: String,
    image: String,
    workdir: PathBuf,
    mounts: Vec<MountSpec>,
    limits: ResourceLimits,
    network: NetworkMode,
    state: SandboxState,
    created_at: DateTime<Utc>,
}

impl Sandbox {
    pub(crate) fn new(
        id: String,
        name: String,
        image: String,
        workdir: PathBuf,
        mounts: Vec<MountSpec>,
        limits: ResourceLimits,
        network: NetworkMode,
    ) -> Self {
        Self {
            id,
            name,
            image,
            workdir,
            mounts,
            limits,
            network,
            state: SandboxState::Created,
            created_at: Utc::now(),
        }
    }

    /// Runtime-assigned container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Working directory inside the sandbox.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn network(&self) -> &NetworkMode {
        &self.network
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move to `next`, refusing illegal transitions.
    pub(crate) fn transition(&mut self, next: SandboxState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidState {
                expected: format!("a state that can become {next}"),
                actual: self.state.to_string(),
            });
        }
        tracing::trace!(sandbox = %self.name, from = %self.state, to = %next, "State transition");
        self.state = next;
        Ok(())
    }

    /// Teardown is final; any prior state may end here.
    pub(crate) fn mark_removed(&mut self) {
        tracing::trace!(sandbox = %self.name, from = %self.state, "Marking removed");
        self.state = SandboxState::Removed;
    }

    /// Ensure the sandbox is in the Running state.
    pub(crate) fn ensure_running(&self) -> Result<(), CoreError> {
        if self.state != SandboxState::Running {
            return Err(CoreError::InvalidState {
                expected: SandboxState::Running.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }
}
