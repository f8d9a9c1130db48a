//! Action types for the consensus state machine.

use crate::TimerId;
use std::time::Duration;
use urna_types::{Block, PbftMessage};

/// Actions the state machine wants performed.
///
/// Actions are **commands** - they describe something to do. The runner
/// executes them and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a message to every peer, fire-and-forget.
    Broadcast { message: PbftMessage },

    /// Append a block that reached commit quorum.
    ///
    /// The runner appends to the chain, persists durably, drains the mempool
    /// of the block's ballots and marks spent tokens, then feeds back
    /// [`crate::Event::BlockPersisted`]. A persistence failure here is fatal
    /// for the replica.
    CommitBlock { block: Block },

    /// Arm (or re-arm) a timer.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a timer if armed.
    CancelTimer { id: TimerId },
}

impl Action {
    /// Action type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::CommitBlock { .. } => "CommitBlock",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
        }
    }
}
