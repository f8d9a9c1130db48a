//! Vote bookkeeping keyed by (sequence, block hash).

use std::collections::{HashMap, HashSet};
use urna_types::NodeId;

/// Prepare or Commit votes, one set of senders per `(sequence, block_hash)`.
///
/// Storing the sender set rather than a counter makes duplicate delivery
/// idempotent: a replica is counted at most once per key.
#[derive(Debug, Default)]
pub struct VoteSet {
    votes: HashMap<(u64, String), HashSet<NodeId>>,
}

impl VoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote. Returns `false` if this sender already voted for the key.
    pub fn insert(&mut self, sequence: u64, block_hash: &str, sender: NodeId) -> bool {
        self.votes
            .entry((sequence, block_hash.to_string()))
            .or_default()
            .insert(sender)
    }

    /// Number of distinct voters for the key.
    pub fn count(&self, sequence: u64, block_hash: &str) -> usize {
        self.votes
            .get(&(sequence, block_hash.to_string()))
            .map_or(0, HashSet::len)
    }

    /// Drop every entry for a sequence number (after commit).
    pub fn remove_sequence(&mut self, sequence: u64) {
        self.votes.retain(|(s, _), _| *s != sequence);
    }

    /// Total number of tracked keys, for introspection.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}
