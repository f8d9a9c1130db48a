//! Event types for the consensus state machine.

use crate::Behavior;
use urna_types::PbftMessage;

/// All possible inputs to the engine.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    /// Periodic batching trigger fired (primary proposes if work is pending).
    ProposalTimer,

    /// Admission coalescing delay elapsed.
    BatchTimer,

    /// Operator requested an immediate consensus round (testing endpoint).
    StartConsensus,

    /// A ballot entered the local mempool.
    BallotAdmitted,

    /// A consensus message arrived from a peer.
    MessageReceived { message: PbftMessage },

    /// The block for a sequence number is durably appended to the chain.
    ///
    /// Completion signal for [`crate::Action::CommitBlock`]; the engine only
    /// returns to idle once it sees this.
    BlockPersisted { sequence: u64, block_hash: String },

    /// Operator changed the fault-injection behavior (testing endpoint).
    BehaviorChanged { behavior: Behavior },
}

impl Event {
    /// Event type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ProposalTimer => "ProposalTimer",
            Event::BatchTimer => "BatchTimer",
            Event::StartConsensus => "StartConsensus",
            Event::BallotAdmitted => "BallotAdmitted",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::BlockPersisted { .. } => "BlockPersisted",
            Event::BehaviorChanged { .. } => "BehaviorChanged",
        }
    }
}
