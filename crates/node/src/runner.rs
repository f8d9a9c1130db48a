//! The event loop owning the consensus engine.
//!
//! A single task receives events from timers, HTTP handlers and its own
//! commit feedback, runs them through the engine, and executes the returned
//! actions. This serializes all protocol logic; the chain and mempool keep
//! their own locks for the read paths.

use crate::metrics;
use crate::network::PeerTransport;
use crate::storage::Storage;
use crate::timers::TimerManager;
use anyhow::Context;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info};
use urna_chain::SharedChain;
use urna_core::{Action, Event};
use urna_mempool::Mempool;
use urna_pbft::{EngineStatus, PbftState};
use urna_types::Block;

/// Observer invoked with each committed block, while no locks are held.
pub type CommitHook = Box<dyn Fn(&Block) + Send + Sync>;

/// Requests the runner to stop after the current event.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Runner {
    engine: PbftState,
    event_rx: mpsc::Receiver<Event>,
    timers: TimerManager,
    transport: PeerTransport,
    chain: SharedChain,
    mempool: Arc<Mempool>,
    storage: Arc<Storage>,
    /// Engine snapshot shared with the status endpoint.
    status: Arc<RwLock<EngineStatus>>,
    commit_hooks: Vec<CommitHook>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: PbftState,
        event_rx: mpsc::Receiver<Event>,
        timers: TimerManager,
        transport: PeerTransport,
        chain: SharedChain,
        mempool: Arc<Mempool>,
        storage: Arc<Storage>,
        status: Arc<RwLock<EngineStatus>>,
    ) -> (Self, ShutdownHandle) {
        let (tx, shutdown_rx) = watch::channel(false);
        let runner = Self {
            engine,
            event_rx,
            timers,
            transport,
            chain,
            mempool,
            storage,
            status,
            commit_hooks: Vec::new(),
            shutdown_rx,
        };
        (runner, ShutdownHandle { tx: Arc::new(tx) })
    }

    /// Register an observer for committed blocks.
    pub fn add_commit_hook(&mut self, hook: CommitHook) {
        self.commit_hooks.push(hook);
    }

    /// Run until shutdown. A storage failure during commit is fatal and
    /// surfaces as an error; the process must not continue past it.
    pub async fn run(mut self) -> anyhow::Result<()> {
        // Kick the periodic proposal trigger; it re-arms itself from then on.
        self.dispatch(Event::ProposalTimer).await?;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!("shutdown requested, stopping runner");
                    break;
                }
                maybe_event = self.event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.dispatch(event).await?,
                        None => break,
                    }
                }
            }
        }

        self.timers.cancel_all();
        Ok(())
    }

    /// Run one event and all internal follow-ups to completion.
    async fn dispatch(&mut self, event: Event) -> anyhow::Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back(event);

        while let Some(event) = queue.pop_front() {
            debug!(event = event.type_name(), "processing event");
            if matches!(event, Event::MessageReceived { .. }) {
                metrics::record_message_received();
            }

            for action in self.engine.handle(event) {
                match action {
                    Action::Broadcast { message } => self.transport.broadcast(&message),
                    Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),
                    Action::CancelTimer { id } => self.timers.cancel_timer(id),
                    Action::CommitBlock { block } => {
                        queue.push_back(self.commit_block(block)?);
                    }
                }
            }
        }

        *self.status.write().await = self.engine.status();
        metrics::set_mempool_size(self.mempool.pending_count());
        Ok(())
    }

    /// The commit transaction: validate-append, durable write, mempool
    /// drain, token marking, observer hooks. Returns the feedback event
    /// that lets the engine go idle.
    fn commit_block(&mut self, block: Block) -> anyhow::Result<Event> {
        let sequence = block.index;
        let block_hash = block.hash.clone();

        {
            let mut chain = self.chain.write();
            chain
                .append(block.clone())
                .context("commit-quorum block failed chain validation")?;
            // The block must be durable before the engine resets to idle; a
            // replica that lost a committed block would restart into a fork.
            self.storage
                .save_block(&block)
                .context("fatal: block persistence failed")?;
        }

        self.mempool.drain(&block.ballots);
        for ballot in &block.ballots {
            if let Some(token) = ballot.token_hash() {
                self.mempool
                    .mark_used(token)
                    .context("fatal: token persistence failed")?;
            }
        }

        metrics::record_block_committed(self.chain.read().height());
        for hook in &self.commit_hooks {
            hook(&block);
        }

        Ok(Event::BlockPersisted {
            sequence,
            block_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use urna_chain::Chain;
    use urna_pbft::PbftConfig;
    use urna_types::{Ballot, LedgerIndex, NodeId, TokenStore};

    /// A single-replica network has f = 0: the replica's own Prepare and
    /// Commit form both quorums, so one StartConsensus drives the whole
    /// pipeline through the runner's commit path.
    #[tokio::test]
    async fn single_replica_commits_through_the_full_pipeline() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("blockchain.db")).unwrap());
        let chain = SharedChain::new(Chain::bootstrap());
        storage.save_block(chain.read().genesis()).unwrap();

        let mempool = Arc::new(Mempool::new(
            Arc::new(chain.clone()) as Arc<dyn LedgerIndex>,
            storage.clone() as Arc<dyn TokenStore>,
        ));
        let engine = PbftState::new(
            NodeId::from("node1"),
            vec![NodeId::from("node1")],
            chain.clone(),
            mempool.clone(),
            PbftConfig::default(),
        );
        let status = Arc::new(RwLock::new(engine.status()));

        let (event_tx, event_rx) = mpsc::channel(64);
        let timers = TimerManager::new(event_tx.clone());
        let transport = PeerTransport::start(Vec::new(), reqwest::Client::new());

        let (mut runner, shutdown) = Runner::new(
            engine,
            event_rx,
            timers,
            transport,
            chain.clone(),
            mempool.clone(),
            storage.clone(),
            status.clone(),
        );

        let committed = Arc::new(AtomicUsize::new(0));
        let seen = committed.clone();
        runner.add_commit_hook(Box::new(move |_block| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let runner_task = tokio::spawn(runner.run());

        mempool.admit(Ballot::vote("alice", "c1")).unwrap();
        event_tx.send(Event::StartConsensus).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while status.read().await.sequence_num < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("block never committed");

        assert_eq!(committed.load(Ordering::SeqCst), 1);
        assert_eq!(mempool.pending_count(), 0);
        assert_eq!(chain.read().height(), 2);
        assert_eq!(storage.block_count().unwrap(), 2);
        assert!(chain.read().has_voter_voted("alice"));

        shutdown.shutdown();
        runner_task.await.unwrap().unwrap();
    }
}
