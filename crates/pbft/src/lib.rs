//! PBFT consensus engine.
//!
//! This crate provides a synchronous three-phase consensus implementation
//! that orders one block per sequence number under a fixed view.
//!
//! # Architecture
//!
//! The state machine processes events synchronously:
//!
//! - `Event::ProposalTimer` / `Event::BatchTimer` → build and broadcast a
//!   block if this replica is the primary and ballots are pending
//! - `Event::MessageReceived` → validate PrePrepare, count Prepare/Commit
//!   votes, advance through the phases when quorums form
//! - `Event::BlockPersisted` → reset to idle for the next sequence
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Protocol
//!
//! With n replicas and f = ⌊(n−1)/3⌋:
//!
//! - The **primary** of a view is the replica with the minimum identifier.
//!   The view is fixed at 0; there is no view change, so a faulty primary
//!   stalls liveness but never safety.
//! - A replica sends **Commit** once it has observed 2f matching Prepare
//!   votes (its own included) for the accepted `(sequence, block_hash)`.
//! - A replica commits the block once it has observed 2f+1 matching Commit
//!   votes. Any two such quorums intersect in an honest replica, so two
//!   different blocks cannot both commit at one sequence number.
//!
//! Vote bookkeeping stores the set of voting replicas per
//! `(sequence, block_hash)`, which makes duplicate delivery idempotent.

mod config;
mod state;
mod vote_set;

pub use config::PbftConfig;
pub use state::{EngineStatus, PbftState, Phase};
pub use vote_set::VoteSet;
