//! Warden reaper entry point.
//!
//! Sweeps the container runtime for sandboxes older than the configured
//! age and removes them, either once or on an interval until interrupted.

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warden_core::{LifecycleConfig, MountPolicy, SandboxLifecycle, SandboxReaper};
use warden_reaper::ReaperConfig;
use warden_runtime::DockerClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("warden_reaper=info".parse()?)
                .add_directive("warden_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Warden reaper");

    let config = ReaperConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;
    config.validate_warn();

    let mut docker = DockerClient::new(&config.docker_socket);
    if let Some(version) = &config.api_version {
        docker = docker.with_api_version(version);
    }
    if let Err(e) = docker.ping().await {
        tracing::warn!(error = %e, "Docker daemon not reachable yet, sweeps will retry");
    }

    let lifecycle = SandboxLifecycle::new(
        Arc::new(docker),
        MountPolicy::new(config.forbidden_paths()),
        LifecycleConfig::default(),
    )?;
    let reaper = Arc::new(SandboxReaper::new(Arc::new(lifecycle)));

    if config.once {
        let report = reaper.sweep(&config.prefix, config.max_age).await?;
        tracing::info!(
            examined = report.examined,
            removed = report.removed,
            failed = report.failed,
            "Single sweep finished"
        );
        return Ok(());
    }

    let handle = reaper.spawn(config.interval, config.prefix.clone(), config.max_age);
    tracing::info!(
        prefix = %config.prefix,
        interval_secs = config.interval.as_secs(),
        "Reaper ready"
    );

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");
    handle.shutdown().await;

    tracing::info!("Reaper shutdown complete");
    Ok(())
}
