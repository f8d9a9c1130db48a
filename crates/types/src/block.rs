//! Blocks: hash-linked units of the ledger.

use crate::ballot::Ballot;
use crate::hash::sha256_hex;
use crate::merkle;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp of the genesis block.
///
/// Fixed so that every replica derives a byte-identical genesis block and
/// therefore the same genesis hash without coordination.
pub const GENESIS_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// Current wall-clock time as an RFC3339 string (second precision, UTC).
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One block of the chain.
///
/// # Invariants
///
/// - `hash` is the SHA-256 of the canonical header (see [`Block::header_string`])
/// - `merkle_root` is the Merkle root over `ballots`
/// - `prev_hash` is empty iff `index == 0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain; 0 is genesis.
    pub index: u64,

    /// Creation time, RFC3339. Informational only, but covered by the hash.
    pub timestamp: String,

    /// Hash of the previous block; empty for genesis.
    pub prev_hash: String,

    /// Merkle root over the ballot sequence; empty for no ballots.
    pub merkle_root: String,

    /// Ballots agreed into this block, in proposal order.
    pub ballots: Vec<Ballot>,

    /// Reserved for optional proof-of-work.
    #[serde(default)]
    pub nonce: u64,

    /// SHA-256 of the canonical header, hex.
    pub hash: String,
}

impl Block {
    /// The genesis block: index 0, no ballots, empty previous hash.
    pub fn genesis() -> Self {
        Self::new(0, String::new(), Vec::new(), GENESIS_TIMESTAMP.to_string())
    }

    /// Build a block with its Merkle root and hash computed.
    pub fn new(index: u64, prev_hash: String, ballots: Vec<Ballot>, timestamp: String) -> Self {
        let merkle_root = merkle::root(&ballots);
        let mut block = Self {
            index,
            timestamp,
            prev_hash,
            merkle_root,
            ballots,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Canonical header string: decimal index, the timestamp as stored, the
    /// previous hash, the Merkle root and the decimal nonce, concatenated.
    ///
    /// Every replica must hash exactly these bytes; the encoding is part of
    /// the protocol.
    pub fn header_string(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.index, self.timestamp, self.prev_hash, self.merkle_root, self.nonce
        )
    }

    /// SHA-256 over the canonical header.
    pub fn compute_hash(&self) -> String {
        sha256_hex(self.header_string().as_bytes())
    }

    /// Check the block's internal invariants: stored hash matches the
    /// canonical header, and the Merkle root matches the ballot sequence.
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash() && self.merkle_root == merkle::root(&self.ballots)
    }

    /// Whether a ballot with the given identifier is part of this block.
    pub fn contains_ballot(&self, ballot_id: &str) -> bool {
        self.ballots.iter().any(|b| b.id == ballot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_stable() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.index, 0);
        assert!(a.prev_hash.is_empty());
        assert!(a.ballots.is_empty());
        assert_eq!(a.merkle_root, "");
        assert!(a.verify());
    }

    #[test]
    fn new_block_verifies() {
        let genesis = Block::genesis();
        let ballots = vec![Ballot::vote("alice", "c1"), Ballot::vote("bob", "c2")];
        let block = Block::new(1, genesis.hash.clone(), ballots, current_timestamp());
        assert!(block.verify());
        assert_eq!(block.prev_hash, genesis.hash);
    }

    #[test]
    fn tampered_hash_fails_verification() {
        let mut block = Block::genesis();
        block.hash = "00".repeat(32);
        assert!(!block.verify());
    }

    #[test]
    fn tampered_ballots_fail_verification() {
        let ballots = vec![Ballot::vote("alice", "c1")];
        let mut block = Block::new(1, "prev".to_string(), ballots, current_timestamp());
        block.ballots.push(Ballot::vote("mallory", "c2"));
        assert!(!block.verify());
    }

    #[test]
    fn serde_round_trip_preserves_hash() {
        let ballots = vec![Ballot::vote("alice", "c1")];
        let block = Block::new(1, "prev".to_string(), ballots, current_timestamp());
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.compute_hash(), block.hash);
        assert!(back.verify());
    }

    #[test]
    fn nonce_is_covered_by_the_hash() {
        let mut block = Block::genesis();
        block.nonce = 7;
        assert_ne!(block.compute_hash(), block.hash);
    }
}
