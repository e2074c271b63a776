//! The node binary: telemetry, config, store, application, and background
//! tasks, waiting for a consensus engine to drive the application surface.

use ember_app::{Config, ConsensusApp};
use ember_node::telemetry::{init_telemetry, TelemetryConfig};
use ember_node::{Node, NodeError};
use std::time::Duration;

#[tokio::main]
async fn main() {
    let _guard = match init_telemetry(&TelemetryConfig::default()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize telemetry: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run().await {
        tracing::error!(error = %e, "node exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    let config = Config::from_env()?;
    tracing::info!(
        chain_id = %config.chain_id,
        data_dir = %config.data_dir.display(),
        "starting node"
    );

    let node = Node::build(config)?;
    let info = node.app().info();
    tracing::info!(
        height = info.last_height,
        app_hash = %info.last_app_hash,
        "application recovered, ready for the consensus engine"
    );

    let sweep = node.start_mempool_sweep(Duration::from_secs(30));

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");

    sweep.shutdown();
    node.close()?;
    Ok(())
}
