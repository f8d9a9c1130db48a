//! Replica assembly.
//!
//! Wires storage, chain, mempool, engine, runner, transport and the HTTP
//! server into one running replica. Used by the binary and by the
//! multi-replica end-to-end tests.

use crate::config::NodeConfig;
use crate::metrics;
use crate::network::PeerTransport;
use crate::rpc::{RpcServer, RpcServerConfig, RpcState};
use crate::runner::{Runner, ShutdownHandle};
use crate::storage::Storage;
use crate::timers::TimerManager;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use urna_chain::{Chain, SharedChain};
use urna_mempool::Mempool;
use urna_pbft::PbftState;
use urna_types::{LedgerIndex, NodeId, TokenStore};

const EVENT_CHANNEL_DEPTH: usize = 1024;

/// A running replica.
pub struct NodeHandle {
    pub node_id: NodeId,
    /// Bound HTTP address.
    pub addr: SocketAddr,
    shutdown: ShutdownHandle,
    runner_task: JoinHandle<Result<()>>,
    rpc_handle: crate::rpc::RpcServerHandle,
}

impl NodeHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request shutdown; `join` to wait for completion.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// A cloneable trigger for shutting down from another task.
    pub fn shutdown_trigger(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Wait for the runner to finish and tear the HTTP server down.
    /// Returns the runner's result: an error here means the replica died
    /// on a fatal condition (storage failure).
    pub async fn join(self) -> Result<()> {
        let result = self.runner_task.await.context("runner task panicked")?;
        self.rpc_handle.shutdown().await;
        result
    }
}

/// Open storage, restore or bootstrap the chain, and start every component
/// of a replica.
pub async fn start_node(config: NodeConfig) -> Result<NodeHandle> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    let storage = Arc::new(
        Storage::open(&config.db_path)
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // Bootstrap genesis on first startup, otherwise restore and re-validate.
    let chain = if storage.block_count()? == 0 {
        let chain = Chain::bootstrap();
        storage.save_block(chain.genesis())?;
        info!(node_id = %config.id, hash = %chain.genesis().hash, "genesis block created");
        chain
    } else {
        let blocks = storage.load_all_blocks()?;
        let chain = Chain::from_blocks(blocks).context("persisted chain failed validation")?;
        info!(node_id = %config.id, height = chain.height(), "chain restored from storage");
        chain
    };
    let chain = SharedChain::new(chain);
    metrics::metrics().chain_height.set(chain.read().height() as f64);

    let mempool = Arc::new(Mempool::new(
        Arc::new(chain.clone()) as Arc<dyn LedgerIndex>,
        storage.clone() as Arc<dyn TokenStore>,
    ));

    let engine = PbftState::new(
        config.id.clone(),
        config.network.node_ids(),
        chain.clone(),
        mempool.clone(),
        config.pbft.clone(),
    );
    let status = Arc::new(RwLock::new(engine.status()));

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let timers = TimerManager::new(event_tx.clone());

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build HTTP client")?;
    let transport = PeerTransport::start(config.peers(), http.clone());

    let (mut runner, shutdown) = Runner::new(
        engine,
        event_rx,
        timers,
        transport,
        chain.clone(),
        mempool.clone(),
        storage,
        status.clone(),
    );
    let hook_node_id = config.id.clone();
    runner.add_commit_hook(Box::new(move |block| {
        info!(
            node_id = %hook_node_id,
            index = block.index,
            hash = %block.hash,
            ballots = block.ballots.len(),
            "block committed"
        );
    }));

    let rpc_state = RpcState {
        node_id: config.id.clone(),
        status,
        chain,
        mempool,
        events: event_tx,
        peers: Arc::new(config.peers()),
        http,
    };
    let rpc_handle = RpcServer::new(
        RpcServerConfig {
            listen_addr: config.listen_addr,
        },
        rpc_state,
    )
    .start()
    .await
    .context("failed to start HTTP server")?;
    let addr = rpc_handle.local_addr();

    let runner_task = tokio::spawn(runner.run());

    info!(node_id = %config.id, addr = %addr, "replica started");
    Ok(NodeHandle {
        node_id: config.id,
        addr,
        shutdown,
        runner_task,
        rpc_handle,
    })
}
