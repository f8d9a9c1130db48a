//! Ballot mempool.
//!
//! Holds admitted-but-unordered ballots in FIFO order, feeds the proposer,
//! and deduplicates. Admission rejects a ballot whose identifier is already
//! pending or committed, whose voter already has a committed or pending VOTE
//! ballot, or whose anonymous token has been spent.
//!
//! The pool is thread-safe behind its own mutex: HTTP handlers admit while
//! the consensus runner snapshots and drains.

mod state;

pub use state::{Mempool, MempoolError};
