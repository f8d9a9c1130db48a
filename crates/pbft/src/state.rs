//! PBFT consensus state machine.
//!
//! Protocol logic only: no I/O, no locks held across suspension points.
//! Broadcasts, persistence and timers are returned as actions for the
//! runner to execute.

use crate::config::PbftConfig;
use crate::vote_set::VoteSet;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use urna_chain::{Chain, SharedChain};
use urna_core::{Action, Behavior, Event, TimerId};
use urna_mempool::Mempool;
use urna_types::{current_timestamp, Ballot, BallotKind, Block, NodeId, PbftMessage};

/// Consensus phase for the current sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No consensus round in flight.
    Idle,
    /// Primary has proposed and implicitly prepared.
    PrePrepared,
    /// Backup validated the proposal and sent its Prepare.
    Prepared,
    /// Commit sent or commit quorum reached; waiting for the durable append.
    CommittedPending,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::PrePrepared => "pre_prepared",
            Phase::Prepared => "prepared",
            Phase::CommittedPending => "committed_pending",
        }
    }
}

/// Snapshot of engine state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub id: NodeId,
    pub state: String,
    pub view: u64,
    pub sequence_num: u64,
    pub is_primary: bool,
    pub peer_count: usize,
    pub message_count: usize,
    pub behavior: String,
    pub malicious_rate: f64,
}

/// Reasons a PrePrepare is dropped. Expected under Byzantine faults, so
/// rejections are logged at debug level and swallowed.
#[derive(Debug, Error)]
enum PrePrepareReject {
    #[error("sender {0} is not the primary of this view")]
    NotFromPrimary(NodeId),
    #[error("already accepted a different block for sequence {0}")]
    Conflicting(u64),
    #[error("block does not deserialize: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("advertised hash does not match the block")]
    HashMismatch,
    #[error("block index {got} does not extend the chain at height {expected}")]
    IndexMismatch { expected: u64, got: u64 },
    #[error("block does not link to the chain tip")]
    BrokenLink,
    #[error("block integrity verification failed")]
    Integrity,
    #[error("invalid ballot {0}: {1}")]
    InvalidBallot(String, String),
}

/// The consensus engine for one replica.
pub struct PbftState {
    node_id: NodeId,
    /// Full replica set, this node included.
    nodes: Vec<NodeId>,
    view: u64,
    sequence: u64,
    phase: Phase,
    behavior: Behavior,

    prepares: VoteSet,
    commits: VoteSet,
    /// Keys this replica has sent a Commit for.
    sent_commit: HashSet<(u64, String)>,
    /// Block hash accepted via PrePrepare (or own proposal) per sequence.
    accepted: HashMap<u64, String>,
    /// Blocks recovered from PrePrepares, for commitment.
    pre_prepares: HashMap<(u64, String), Block>,
    /// Key currently handed to the runner for the durable append.
    committing: Option<(u64, String)>,
    /// Accepted protocol messages, for bookkeeping and the status endpoint.
    message_log: Vec<PbftMessage>,

    chain: SharedChain,
    mempool: Arc<Mempool>,
    config: PbftConfig,
}

impl PbftState {
    pub fn new(
        node_id: NodeId,
        nodes: Vec<NodeId>,
        chain: SharedChain,
        mempool: Arc<Mempool>,
        config: PbftConfig,
    ) -> Self {
        let sequence = chain.read().height();
        let state = Self {
            node_id,
            nodes,
            view: 0,
            sequence,
            phase: Phase::Idle,
            behavior: Behavior::Honest,
            prepares: VoteSet::new(),
            commits: VoteSet::new(),
            sent_commit: HashSet::new(),
            accepted: HashMap::new(),
            pre_prepares: HashMap::new(),
            committing: None,
            message_log: Vec::new(),
            chain,
            mempool,
            config,
        };
        info!(
            node_id = %state.node_id,
            is_primary = state.is_primary(),
            view = state.view,
            sequence = state.sequence,
            "consensus engine initialized"
        );
        state
    }

    /// The primary of a view: minimum identifier over the replica set.
    pub fn primary(&self) -> &NodeId {
        self.nodes.iter().min().expect("replica set is non-empty")
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == &self.node_id
    }

    /// Maximum tolerated faulty replicas: f = ⌊(n−1)/3⌋.
    fn max_faulty(&self) -> usize {
        (self.nodes.len() - 1) / 3
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            id: self.node_id.clone(),
            state: self.phase.as_str().to_string(),
            view: self.view,
            sequence_num: self.sequence,
            is_primary: self.is_primary(),
            peer_count: self.nodes.len() - 1,
            message_count: self.message_log.len(),
            behavior: self.behavior.name().to_string(),
            malicious_rate: self.behavior.malicious_rate(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Process one event to completion.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ProposalTimer => {
                let mut actions = self.maybe_propose();
                // The periodic trigger always re-arms itself.
                actions.push(Action::SetTimer {
                    id: TimerId::Proposal,
                    duration: self.config.proposal_interval,
                });
                actions
            }
            Event::BatchTimer | Event::StartConsensus => self.maybe_propose(),
            Event::BallotAdmitted => {
                if self.is_primary() && self.phase == Phase::Idle {
                    vec![Action::SetTimer {
                        id: TimerId::Batch,
                        duration: self.config.batch_delay,
                    }]
                } else {
                    Vec::new()
                }
            }
            Event::MessageReceived { message } => self.on_message(message),
            Event::BlockPersisted {
                sequence,
                block_hash,
            } => self.on_block_persisted(sequence, block_hash),
            Event::BehaviorChanged { behavior } => {
                warn!(
                    node_id = %self.node_id,
                    behavior = behavior.name(),
                    malicious_rate = behavior.malicious_rate(),
                    "behavior override applied"
                );
                self.behavior = behavior;
                Vec::new()
            }
        }
    }

    // ─── Proposer ──────────────────────────────────────────────────────────

    fn maybe_propose(&mut self) -> Vec<Action> {
        if !self.is_primary() || self.phase != Phase::Idle {
            return Vec::new();
        }
        if matches!(self.behavior, Behavior::Crash) {
            return Vec::new();
        }

        let mut pending = self.mempool.snapshot();
        if pending.is_empty() {
            debug!(node_id = %self.node_id, "no pending ballots, skipping proposal");
            return Vec::new();
        }
        pending.truncate(self.config.max_ballots_per_block);

        let block = self
            .chain
            .read()
            .build_next(pending, current_timestamp());
        let block_data = match serde_json::to_string(&block) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to serialize proposal block");
                return Vec::new();
            }
        };

        let sequence = self.sequence;
        let hash = block.hash.clone();
        info!(
            node_id = %self.node_id,
            sequence,
            block_hash = %hash,
            ballots = block.ballots.len(),
            "starting consensus"
        );

        self.phase = Phase::PrePrepared;
        self.accepted.insert(sequence, hash.clone());
        self.pre_prepares
            .insert((sequence, hash.clone()), block);
        // The primary implicitly prepares its own proposal.
        self.prepares.insert(sequence, &hash, self.node_id.clone());

        let timestamp = current_timestamp();
        let mut actions = vec![
            Action::Broadcast {
                message: PbftMessage::PrePrepare {
                    view: self.view,
                    sequence,
                    node_id: self.node_id.clone(),
                    block_hash: hash.clone(),
                    block_data,
                    timestamp: timestamp.clone(),
                    signature: None,
                },
            },
            Action::Broadcast {
                message: PbftMessage::Prepare {
                    view: self.view,
                    sequence,
                    node_id: self.node_id.clone(),
                    block_hash: hash.clone(),
                    timestamp,
                    signature: None,
                },
            },
        ];
        self.check_prepare_threshold(sequence, &hash, &mut actions);
        actions
    }

    // ─── Message dispatch ──────────────────────────────────────────────────

    fn on_message(&mut self, message: PbftMessage) -> Vec<Action> {
        if matches!(self.behavior, Behavior::Crash) {
            debug!(node_id = %self.node_id, "crashed, dropping message");
            return Vec::new();
        }
        if message.view() != self.view {
            debug!(
                node_id = %self.node_id,
                message_view = message.view(),
                local_view = self.view,
                "dropping message from different view"
            );
            return Vec::new();
        }

        self.message_log.push(message.clone());

        match message {
            PbftMessage::PrePrepare {
                sequence,
                node_id,
                block_hash,
                block_data,
                ..
            } => self.on_pre_prepare(sequence, node_id, block_hash, block_data),
            PbftMessage::Prepare {
                sequence,
                node_id,
                block_hash,
                ..
            } => self.on_prepare(sequence, node_id, block_hash),
            PbftMessage::Commit {
                sequence,
                node_id,
                block_hash,
                ..
            } => self.on_commit(sequence, node_id, block_hash),
            PbftMessage::ViewChange { node_id, .. } => {
                // Fixed view: parsed for wire compatibility, never acted on.
                debug!(sender = %node_id, "ignoring VIEW_CHANGE under fixed view");
                Vec::new()
            }
        }
    }

    // ─── Backup: PrePrepare ────────────────────────────────────────────────

    fn on_pre_prepare(
        &mut self,
        sequence: u64,
        sender: NodeId,
        block_hash: String,
        block_data: String,
    ) -> Vec<Action> {
        if self.is_primary() {
            return Vec::new();
        }
        if self.phase != Phase::Idle {
            debug!(node_id = %self.node_id, phase = self.phase.as_str(), "ignoring PrePrepare, not idle");
            return Vec::new();
        }
        if self.misbehaves() {
            warn!(node_id = %self.node_id, "malicious: refusing to participate in consensus");
            return Vec::new();
        }

        let block = match self.validate_pre_prepare(sequence, &sender, &block_hash, &block_data) {
            Ok(block) => block,
            Err(reject) => {
                debug!(
                    node_id = %self.node_id,
                    sequence,
                    block_hash = %block_hash,
                    reason = %reject,
                    "rejecting PrePrepare"
                );
                return Vec::new();
            }
        };

        debug!(
            node_id = %self.node_id,
            sequence,
            block_hash = %block_hash,
            "block validated, sending Prepare"
        );

        self.sequence = sequence;
        self.phase = Phase::Prepared;
        self.accepted.insert(sequence, block_hash.clone());
        self.pre_prepares
            .insert((sequence, block_hash.clone()), block);
        self.prepares
            .insert(sequence, &block_hash, self.node_id.clone());

        let mut actions = vec![Action::Broadcast {
            message: PbftMessage::Prepare {
                view: self.view,
                sequence,
                node_id: self.node_id.clone(),
                block_hash: block_hash.clone(),
                timestamp: current_timestamp(),
                signature: None,
            },
        }];
        self.check_prepare_threshold(sequence, &block_hash, &mut actions);
        actions
    }

    fn validate_pre_prepare(
        &self,
        sequence: u64,
        sender: &NodeId,
        block_hash: &str,
        block_data: &str,
    ) -> Result<Block, PrePrepareReject> {
        if sender != self.primary() {
            return Err(PrePrepareReject::NotFromPrimary(sender.clone()));
        }
        if let Some(accepted) = self.accepted.get(&sequence) {
            if accepted != block_hash {
                return Err(PrePrepareReject::Conflicting(sequence));
            }
        }

        let block: Block = serde_json::from_str(block_data)?;
        if block.hash != block.compute_hash() || block.hash != block_hash {
            return Err(PrePrepareReject::HashMismatch);
        }

        let chain = self.chain.read();
        if block.index != chain.height() {
            return Err(PrePrepareReject::IndexMismatch {
                expected: chain.height(),
                got: block.index,
            });
        }
        if block.prev_hash != chain.tip().hash {
            return Err(PrePrepareReject::BrokenLink);
        }
        if !block.verify() {
            return Err(PrePrepareReject::Integrity);
        }

        let mut block_voters = HashSet::new();
        let mut block_ids = HashSet::new();
        for ballot in &block.ballots {
            self.validate_ballot(ballot, &chain, &mut block_voters, &mut block_ids)
                .map_err(|reason| PrePrepareReject::InvalidBallot(ballot.id.clone(), reason))?;
        }

        Ok(block)
    }

    /// Ballot validity: non-empty, content-consistent identifier, no double
    /// voting against the committed ledger or within the block, unspent
    /// anonymous token.
    fn validate_ballot(
        &self,
        ballot: &Ballot,
        chain: &Chain,
        block_voters: &mut HashSet<String>,
        block_ids: &mut HashSet<String>,
    ) -> Result<(), String> {
        if ballot.id.is_empty() {
            return Err("empty identifier".to_string());
        }
        if ballot.expected_id() != ballot.id {
            return Err("identifier inconsistent with content".to_string());
        }
        if chain.contains_ballot(&ballot.id) || !block_ids.insert(ballot.id.clone()) {
            return Err("duplicate ballot".to_string());
        }
        match ballot.kind {
            BallotKind::Vote => {
                if ballot.voter_id.is_empty() {
                    return Err("VOTE ballot without voter".to_string());
                }
                if chain.has_voter_voted(&ballot.voter_id)
                    || !block_voters.insert(ballot.voter_id.clone())
                {
                    return Err(format!("voter {} has already voted", ballot.voter_id));
                }
            }
            BallotKind::AnonVote => {
                let token = ballot
                    .token_hash()
                    .ok_or_else(|| "anonymous ballot without token".to_string())?;
                match self.mempool.is_used(token) {
                    Ok(false) => {}
                    Ok(true) => return Err("anonymous token already spent".to_string()),
                    Err(err) => return Err(format!("token store unavailable: {err}")),
                }
            }
        }
        Ok(())
    }

    // ─── Prepare / Commit counting ─────────────────────────────────────────

    fn on_prepare(&mut self, sequence: u64, sender: NodeId, block_hash: String) -> Vec<Action> {
        if self.misbehaves() {
            warn!(node_id = %self.node_id, sender = %sender, "malicious: ignoring Prepare");
            return Vec::new();
        }
        if sequence < self.sequence || self.is_committed_key(sequence, &block_hash) {
            return Vec::new();
        }

        self.prepares.insert(sequence, &block_hash, sender);
        debug!(
            node_id = %self.node_id,
            sequence,
            block_hash = %block_hash,
            count = self.prepares.count(sequence, &block_hash),
            "Prepare recorded"
        );

        let mut actions = Vec::new();
        if sequence == self.sequence {
            self.check_prepare_threshold(sequence, &block_hash, &mut actions);
        }
        actions
    }

    fn on_commit(&mut self, sequence: u64, sender: NodeId, block_hash: String) -> Vec<Action> {
        if self.misbehaves() {
            warn!(node_id = %self.node_id, sender = %sender, "malicious: ignoring Commit");
            return Vec::new();
        }
        if sequence < self.sequence || self.is_committed_key(sequence, &block_hash) {
            return Vec::new();
        }

        // Commits may arrive before the local Prepare phase completes; the
        // counter is updated regardless and the threshold re-checked.
        self.commits.insert(sequence, &block_hash, sender);
        debug!(
            node_id = %self.node_id,
            sequence,
            block_hash = %block_hash,
            count = self.commits.count(sequence, &block_hash),
            "Commit recorded"
        );

        let mut actions = Vec::new();
        if sequence == self.sequence {
            self.check_commit_threshold(sequence, &block_hash, &mut actions);
        }
        actions
    }

    /// On 2f Prepares for the accepted key: send our Commit exactly once.
    fn check_prepare_threshold(&mut self, sequence: u64, block_hash: &str, actions: &mut Vec<Action>) {
        let key = (sequence, block_hash.to_string());
        if self.sent_commit.contains(&key) {
            return;
        }
        if !matches!(self.phase, Phase::PrePrepared | Phase::Prepared) {
            return;
        }
        if self.accepted.get(&sequence).map(String::as_str) != Some(block_hash) {
            return;
        }

        let required = 2 * self.max_faulty();
        if self.prepares.count(sequence, block_hash) < required {
            return;
        }

        if self.misbehaves() {
            warn!(node_id = %self.node_id, "malicious: withholding Commit");
            return;
        }

        info!(
            node_id = %self.node_id,
            sequence,
            block_hash = %block_hash,
            prepares = self.prepares.count(sequence, block_hash),
            required,
            "Prepare quorum reached, sending Commit"
        );

        self.sent_commit.insert(key);
        self.phase = Phase::CommittedPending;
        self.commits.insert(sequence, block_hash, self.node_id.clone());
        actions.push(Action::Broadcast {
            message: PbftMessage::Commit {
                view: self.view,
                sequence,
                node_id: self.node_id.clone(),
                block_hash: block_hash.to_string(),
                timestamp: current_timestamp(),
                signature: None,
            },
        });
        self.check_commit_threshold(sequence, block_hash, actions);
    }

    /// On 2f+1 Commits with the block at hand: hand the block to the runner
    /// for the durable append, exactly once.
    fn check_commit_threshold(&mut self, sequence: u64, block_hash: &str, actions: &mut Vec<Action>) {
        if self.committing.is_some() {
            return;
        }

        let required = 2 * self.max_faulty() + 1;
        if self.commits.count(sequence, block_hash) < required {
            return;
        }

        // Recover the proposed block from the stored PrePrepare. Without it
        // the replica waits; there is no peer fetch in this protocol version.
        let Some(block) = self.pre_prepares.get(&(sequence, block_hash.to_string())) else {
            debug!(
                node_id = %self.node_id,
                sequence,
                block_hash = %block_hash,
                "Commit quorum without PrePrepare, waiting"
            );
            return;
        };

        info!(
            node_id = %self.node_id,
            sequence,
            block_hash = %block_hash,
            commits = self.commits.count(sequence, block_hash),
            required,
            "Commit quorum reached, appending block"
        );

        self.phase = Phase::CommittedPending;
        self.committing = Some((sequence, block_hash.to_string()));
        actions.push(Action::CommitBlock {
            block: block.clone(),
        });
    }

    // ─── Commit completion ─────────────────────────────────────────────────

    fn on_block_persisted(&mut self, sequence: u64, block_hash: String) -> Vec<Action> {
        if self.committing.as_ref() != Some(&(sequence, block_hash.clone())) {
            warn!(
                node_id = %self.node_id,
                sequence,
                block_hash = %block_hash,
                "unexpected BlockPersisted, ignoring"
            );
            return Vec::new();
        }

        self.committing = None;
        self.phase = Phase::Idle;
        self.sequence = sequence + 1;

        // Garbage-collect bookkeeping for the finished sequence.
        self.prepares.remove_sequence(sequence);
        self.commits.remove_sequence(sequence);
        self.sent_commit.retain(|(s, _)| *s != sequence);
        self.accepted.remove(&sequence);
        self.pre_prepares.retain(|(s, _), _| *s != sequence);

        info!(
            node_id = %self.node_id,
            sequence,
            next_sequence = self.sequence,
            "sequence complete, engine idle"
        );

        // Keep draining: if ballots are still pending, schedule the next round.
        if self.is_primary() && self.mempool.pending_count() > 0 {
            vec![Action::SetTimer {
                id: TimerId::Batch,
                duration: self.config.batch_delay,
            }]
        } else {
            Vec::new()
        }
    }

    // ─── Helpers ───────────────────────────────────────────────────────────

    /// Whether the key is already being committed; later votes for it are
    /// ignored.
    fn is_committed_key(&self, sequence: u64, block_hash: &str) -> bool {
        self.committing
            .as_ref()
            .is_some_and(|(s, h)| *s == sequence && h == block_hash)
    }

    /// Sample the malicious coin. Honest and crashed replicas never misbehave
    /// here (crash is handled before dispatch).
    fn misbehaves(&self) -> bool {
        match self.behavior {
            Behavior::Malicious { rate } => rand::random::<f64>() < rate,
            _ => false,
        }
    }
}
