//! `otel-runner`: composition root for the OTLP bridge.
//!
//! Startup sequence:
//! 1. Load the runner [`Config`] and the bridge configuration from the environment.
//! 2. Install the tracing subscriber with the bridge layer.
//! 3. Start the telemetry [`Manager`].
//! 4. Spawn the heartbeat task.
//! 5. Wait for Ctrl-C / SIGTERM, stop the heartbeat, then shut telemetry down
//!    within a deadline.

mod config;
mod heartbeat;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use otel_bridge::{Deadline, Manager};
use tracing::{error, info, warn};

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;
    let otel_cfg = otel_bridge::Config::from_env().map_err(|e| {
        eprintln!("ERROR: telemetry configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Tracing
    // -----------------------------------------------------------------------
    let manager = Arc::new(Manager::new());
    telemetry::init(&cfg.log_level, &manager.log_sink())?;

    // -----------------------------------------------------------------------
    // 3. Telemetry pipeline
    // -----------------------------------------------------------------------
    manager
        .start(&otel_cfg, env!("CARGO_PKG_VERSION"), None)
        .context("failed to start telemetry pipeline")?;
    if let Some(hook) = manager.log_hook() {
        hook.update_context([("runner.pid", std::process::id().to_string())]);
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        telemetry = manager.is_active(),
        endpoint = %otel_cfg.endpoint,
        "otel-runner starting"
    );

    // -----------------------------------------------------------------------
    // 4. Background tasks
    // -----------------------------------------------------------------------
    let heartbeat_task = heartbeat::spawn(Arc::clone(&manager), cfg.heartbeat_interval());

    // -----------------------------------------------------------------------
    // 5. Shutdown
    // -----------------------------------------------------------------------
    shutdown_signal().await;
    info!("shutdown signal received; flushing telemetry");

    // No async task may wait on the manager while it flushes below.
    heartbeat::stop(heartbeat_task).await;
    let deadline = Deadline::after(cfg.shutdown_timeout());
    let teardown = Arc::clone(&manager);
    let result = tokio::task::spawn_blocking(move || teardown.shutdown(deadline))
        .await
        .context("telemetry shutdown task failed")?;

    if let Err(e) = result {
        // The log pipeline is gone; this reaches stdout only.
        error!(error = %e, "telemetry shutdown incomplete");
        return Err(e.into());
    }
    Ok(())
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
