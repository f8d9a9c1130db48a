//! Urna replica binary.
//!
//! # Usage
//!
//! ```bash
//! # Start replica node1 from a membership file
//! urna-node --id node1 --config network.json --data ./data
//!
//! # Override the configured port
//! urna-node --id node2 --port 9090
//! ```
//!
//! The membership file lists every replica:
//!
//! ```json
//! { "nodes": [ { "id": "node1", "address": "127.0.0.1", "port": 8081 }, ... ] }
//! ```
//!
//! Exit status is 0 on clean shutdown and non-zero on fatal initialization
//! or storage errors.

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use urna_node::{start_node, Cli, NodeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = NodeConfig::from_cli(&cli)?;
    info!(
        node_id = %config.id,
        replicas = config.network.len(),
        listen = %config.listen_addr,
        data = %config.data_dir.display(),
        "starting replica"
    );

    let handle = start_node(config).await?;

    // Shut down on Ctrl+C or SIGTERM.
    let shutdown = handle.shutdown_trigger();
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C"),
            _ = terminate => info!("received SIGTERM"),
        }

        info!("initiating graceful shutdown");
        shutdown.shutdown();
    });

    handle.join().await?;
    info!("replica shutdown complete");
    Ok(())
}
