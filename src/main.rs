//! Process entry point for a ShardMesh node.
//!
//! Loads configuration from the environment, builds a [`NodeRuntime`], runs
//! the startup sequence, waits for a shutdown signal, and runs the shutdown
//! sequence, translating every outcome into the exit code contract.

use std::sync::Arc;

use shardmesh_core::{AppConfig, ExitReason, NodeRuntime, NoopEffector, NoopRunner};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shardmesh=info")),
        )
        .json()
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(ExitReason::ConfigInvalid.code());
        }
    };

    info!(mode = ?config.mode, node = %config.node.name, "starting shardmesh node");

    let runtime = match NodeRuntime::new_with_config(
        config,
        Arc::new(NoopRunner),
        Arc::new(NoopEffector::new(0)),
    )
    .await
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to construct node runtime");
            std::process::exit(e.exit_reason().code());
        }
    };

    if let Err(e) = runtime.start().await {
        error!(error = %e, "node runtime failed to start");
        std::process::exit(e.exit_reason().code());
    }

    info!("node runtime started, awaiting shutdown signal");

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "unable to listen for shutdown signal"),
    }

    let errors = runtime.stop().await;
    if !errors.is_empty() {
        warn!(?errors, "shutdown completed with errors");
    }

    info!("shardmesh node stopped");
    std::process::exit(ExitReason::CleanShutdown.code());
}
