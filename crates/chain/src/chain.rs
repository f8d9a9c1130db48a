//! Chain state and append validation.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use urna_types::{Ballot, BallotKind, Block, LedgerIndex};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Block index does not continue the chain.
    #[error("invalid block index: expected {expected}, got {got}")]
    IndexMismatch { expected: u64, got: u64 },

    /// Previous-hash link does not match the current tip.
    #[error("block {index} does not link to the chain tip")]
    BrokenLink { index: u64 },

    /// Header hash or Merkle root inconsistent with the block contents.
    #[error("block {index} fails integrity verification")]
    InvalidBlock { index: u64 },

    /// Restored block set does not start at a genesis block.
    #[error("restored chain does not start at genesis")]
    MissingGenesis,
}

/// The committed chain plus admission indexes.
#[derive(Debug, PartialEq)]
pub struct Chain {
    blocks: Vec<Block>,
    /// Identifiers of every committed ballot.
    ballot_ids: HashSet<String>,
    /// Voters with a committed VOTE ballot.
    voters: HashSet<String>,
}

impl Chain {
    /// Fresh chain containing only the genesis block.
    pub fn bootstrap() -> Self {
        let mut chain = Self {
            blocks: Vec::new(),
            ballot_ids: HashSet::new(),
            voters: HashSet::new(),
        };
        chain.blocks.push(Block::genesis());
        chain
    }

    /// Restore a chain from persisted blocks, re-validating every link.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainError> {
        let first = match blocks.first() {
            Some(b) => b.clone(),
            None => return Err(ChainError::MissingGenesis),
        };
        if first.index != 0 || !first.prev_hash.is_empty() {
            return Err(ChainError::MissingGenesis);
        }
        if !first.verify() {
            return Err(ChainError::InvalidBlock { index: first.index });
        }

        let mut chain = Self {
            blocks: Vec::new(),
            ballot_ids: HashSet::new(),
            voters: HashSet::new(),
        };
        chain.index_ballots(&first);
        chain.blocks.push(first);
        for block in blocks.into_iter().skip(1) {
            chain.append(block)?;
        }
        Ok(chain)
    }

    /// Number of blocks, genesis included. The next block's index.
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// The most recent block.
    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always holds genesis")
    }

    /// The genesis block.
    pub fn genesis(&self) -> &Block {
        self.blocks.first().expect("chain always holds genesis")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block at the given index, if committed.
    pub fn block(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Hashes of every block in index order.
    pub fn block_hashes(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.hash.clone()).collect()
    }

    /// Append a block, validating continuity, linkage and integrity.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        let expected = self.height();
        if block.index != expected {
            return Err(ChainError::IndexMismatch {
                expected,
                got: block.index,
            });
        }
        if block.prev_hash != self.tip().hash {
            return Err(ChainError::BrokenLink { index: block.index });
        }
        if !block.verify() {
            return Err(ChainError::InvalidBlock { index: block.index });
        }

        self.index_ballots(&block);
        info!(
            index = block.index,
            hash = %block.hash,
            ballots = block.ballots.len(),
            "block appended"
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Verify the whole chain: every block's invariants plus every link.
    pub fn verify(&self) -> bool {
        for (i, block) in self.blocks.iter().enumerate() {
            if !block.verify() {
                debug!(index = i, "chain verification: block integrity failed");
                return false;
            }
            if i > 0 && block.prev_hash != self.blocks[i - 1].hash {
                debug!(index = i, "chain verification: broken link");
                return false;
            }
        }
        true
    }

    /// Whether a ballot with this identifier is committed anywhere.
    pub fn contains_ballot(&self, ballot_id: &str) -> bool {
        self.ballot_ids.contains(ballot_id)
    }

    /// Whether this voter already has a committed VOTE ballot.
    pub fn has_voter_voted(&self, voter_id: &str) -> bool {
        self.voters.contains(voter_id)
    }

    /// Vote counts per candidate across the whole chain.
    pub fn tally(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for block in &self.blocks {
            for ballot in &block.ballots {
                *counts.entry(ballot.candidate_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    fn index_ballots(&mut self, block: &Block) {
        for ballot in &block.ballots {
            self.ballot_ids.insert(ballot.id.clone());
            if ballot.kind == BallotKind::Vote && !ballot.voter_id.is_empty() {
                self.voters.insert(ballot.voter_id.clone());
            }
        }
    }

    /// Build the next block on top of the tip from the given ballots.
    pub fn build_next(&self, ballots: Vec<Ballot>, timestamp: String) -> Block {
        Block::new(self.height(), self.tip().hash.clone(), ballots, timestamp)
    }
}

/// Shared handle to the chain: one writer (the commit path), many readers.
#[derive(Clone)]
pub struct SharedChain(Arc<RwLock<Chain>>);

impl SharedChain {
    pub fn new(chain: Chain) -> Self {
        Self(Arc::new(RwLock::new(chain)))
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Chain> {
        self.0.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Chain> {
        self.0.write()
    }
}

impl LedgerIndex for SharedChain {
    fn contains_ballot(&self, ballot_id: &str) -> bool {
        self.read().contains_ballot(ballot_id)
    }

    fn has_voter_voted(&self, voter_id: &str) -> bool {
        self.read().has_voter_voted(voter_id)
    }
}
