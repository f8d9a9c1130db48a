//! CLI surface and resolved node configuration.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use urna_pbft::PbftConfig;
use urna_types::{NetworkConfig, NodeEntry, NodeId};

/// Urna ballot-ledger replica.
///
/// Runs one replica of the PBFT-replicated voting ledger.
#[derive(Parser, Debug)]
#[command(name = "urna-node")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Replica identifier; must appear in the network config.
    #[arg(long)]
    pub id: String,

    /// Override the port configured for this replica.
    #[arg(long)]
    pub port: Option<u16>,

    /// Network membership file.
    #[arg(long, default_value = "network.json")]
    pub config: PathBuf,

    /// Data directory root; this replica isolates under `node_<id>/`.
    #[arg(long, default_value = "./data")]
    pub data: PathBuf,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Proposal interval in milliseconds.
    #[arg(long)]
    pub proposal_interval_ms: Option<u64>,

    /// Admission coalescing delay in milliseconds.
    #[arg(long)]
    pub batch_delay_ms: Option<u64>,
}

/// Fully resolved configuration for one replica.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    pub network: NetworkConfig,
    pub listen_addr: SocketAddr,
    /// Per-replica data directory (`<data>/node_<id>`).
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub pbft: PbftConfig,
}

impl NodeConfig {
    /// Resolve the CLI against the membership file.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let network = NetworkConfig::load(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))?;

        let mut pbft = PbftConfig::default();
        if let Some(ms) = cli.proposal_interval_ms {
            pbft = pbft.with_proposal_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = cli.batch_delay_ms {
            pbft = pbft.with_batch_delay(Duration::from_millis(ms));
        }

        Self::resolve(NodeId::from(cli.id.as_str()), network, cli.port, &cli.data, pbft)
    }

    /// Build a configuration from parts; also the entry point for tests
    /// that assemble replicas without a config file.
    pub fn resolve(
        id: NodeId,
        network: NetworkConfig,
        port_override: Option<u16>,
        data_root: &PathBuf,
        pbft: PbftConfig,
    ) -> Result<Self> {
        let Some(entry) = network.entry(&id) else {
            bail!("node {id} not found in network configuration");
        };
        let port = port_override.unwrap_or(entry.port);
        let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let data_dir = data_root.join(format!("node_{id}"));
        let db_path = data_dir.join("blockchain.db");

        Ok(Self {
            id,
            network,
            listen_addr,
            data_dir,
            db_path,
            pbft,
        })
    }

    /// Every other replica in the membership set.
    pub fn peers(&self) -> Vec<NodeEntry> {
        self.network.peers(&self.id)
    }
}
