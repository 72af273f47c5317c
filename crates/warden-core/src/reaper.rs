//! Garbage collection of abandoned sandboxes.
//!
//! Sandboxes whose owner crashed are never removed by the owner. The reaper
//! asks the runtime for every container under a name prefix, stopped ones
//! included, and removes those older than a threshold. There is no
//! in-process registry; the runtime's list is the source of truth.
//!
//! # Example
//!
//! ```rust,ignore
//! let reaper = Arc::new(SandboxReaper::new(lifecycle));
//! let report = reaper.sweep("sandbox-", Duration::from_secs(24 * 3600)).await?;
//!
//! // or in the background
//! let handle = reaper.spawn(Duration::from_secs(600), "sandbox-", max_age);
//! handle.shutdown().await;
//! ```

use crate::error::Result;
use crate::lifecycle::{SandboxLifecycle, Teardown};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use warden_runtime::ListOptions;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Containers matching the prefix.
    pub examined: usize,
    /// Stale containers that are now gone.
    pub removed: usize,
    /// Stale containers that could not be removed.
    pub failed: usize,
}

/// Removes sandboxes older than a threshold.
pub struct SandboxReaper {
    lifecycle: Arc<SandboxLifecycle>,
}

impl SandboxReaper {
    pub fn new(lifecycle: Arc<SandboxLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Remove every sandbox named `prefix*` created more than `max_age` ago.
    ///
    /// Individual removal failures are logged and counted, never returned.
    ///
    /// # Errors
    ///
    /// Fails only if the runtime cannot list containers.
    pub async fn sweep(&self, prefix: &str, max_age: Duration) -> Result<SweepReport> {
        self.sweep_at(prefix, max_age, Utc::now()).await
    }

    /// [`sweep`](Self::sweep) with an explicit clock.
    pub async fn sweep_at(
        &self,
        prefix: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let start = std::time::Instant::now();
        let options = ListOptions {
            all: true,
            name: Some(escape_name_filter(prefix)),
            labels: Vec::new(),
        };
        let containers = self.lifecycle.runtime().list_containers(&options).await?;

        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp().saturating_sub(max_age_secs);
        let mut report = SweepReport::default();

        // The runtime's name filter is an unanchored regex; narrow to real prefixes.
        for container in containers
            .iter()
            .filter(|c| c.name().is_some_and(|n| n.starts_with(prefix)))
        {
            let name = container.name().unwrap_or_default();
            report.examined += 1;
            if container.created >= cutoff {
                tracing::trace!(sandbox = %name, created = container.created, "Sandbox is recent, keeping");
                continue;
            }

            tracing::info!(
                sandbox = %name,
                sandbox_id = %container.id,
                state = %container.state,
                age_secs = now.timestamp() - container.created,
                "Reaping stale sandbox"
            );
            match self.lifecycle.remove_container(&container.id).await {
                Teardown::Removed | Teardown::AlreadyGone => report.removed += 1,
                Teardown::Failed(_) => report.failed += 1,
            }
        }

        tracing::info!(
            prefix = %prefix,
            examined = report.examined,
            removed = report.removed,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sweep complete"
        );
        Ok(report)
    }

    /// Sweep every `interval` until the returned handle is shut down.
    ///
    /// The first sweep runs immediately.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        prefix: impl Into<String>,
        max_age: Duration,
    ) -> ReaperHandle {
        let prefix = prefix.into();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_notify = Arc::new(Notify::new());

        tracing::info!(
            interval_secs = interval.as_secs(),
            max_age_secs = max_age.as_secs(),
            prefix = %prefix,
            "Starting background reaper"
        );

        let handle = tokio::spawn(Self::reaper_loop(
            self,
            interval,
            prefix,
            max_age,
            Arc::clone(&shutdown),
            Arc::clone(&shutdown_notify),
        ));

        ReaperHandle {
            shutdown,
            shutdown_notify,
            handle: Some(handle),
        }
    }

    async fn reaper_loop(
        reaper: Arc<Self>,
        interval: Duration,
        prefix: String,
        max_age: Duration,
        shutdown: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = reaper.sweep(&prefix, max_age).await {
                tracing::warn!(error = %e, "Sweep failed, retrying next interval");
            }

            tokio::select! {
                biased;

                _ = shutdown_notify.notified() => {
                    tracing::info!("Reaper received shutdown signal");
                    break;
                }

                _ = sleep(interval) => {}
            }
        }
        tracing::debug!("Reaper loop exited");
    }
}

/// Handle to a background reaper task.
pub struct ReaperHandle {
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
            && !self.shutdown.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down reaper");
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_one();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Reaper task panicked during shutdown");
            }
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!("ReaperHandle dropped without shutdown, aborting task");
            handle.abort();
        }
    }
}

/// Escape regex metacharacters so the runtime's name filter matches `prefix` literally.
fn escape_name_filter(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
