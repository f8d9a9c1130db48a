//! Merkle tree over a block's ballot sequence.
//!
//! Leaves are SHA-256 hashes of canonical ballot bytes; internal nodes hash
//! the concatenation of their children's hex digests. A level of odd size
//! duplicates its last node. The root of an empty sequence is the empty
//! string.
//!
//! Inclusion proofs record, for every step, the sibling hash together with
//! the side it sits on, so verification folds deterministically instead of
//! guessing the order.

use crate::ballot::Ballot;
use crate::hash::sha256_hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the concatenation a proof sibling occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash at this level.
    pub hash: String,
    /// Side of the sibling relative to the running hash.
    pub side: Side,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    /// The requested ballot is not part of the block.
    #[error("ballot not present in block")]
    NotInBlock,
}

/// Merkle root over a ballot sequence. Empty sequence yields `""`.
pub fn root(ballots: &[Ballot]) -> String {
    if ballots.is_empty() {
        return String::new();
    }
    let mut level: Vec<String> = ballots.iter().map(Ballot::leaf_hash).collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.remove(0)
}

/// Build an inclusion proof for the ballot with the given identifier.
pub fn proof(ballots: &[Ballot], ballot_id: &str) -> Result<Vec<ProofStep>, MerkleError> {
    let mut index = ballots
        .iter()
        .position(|b| b.id == ballot_id)
        .ok_or(MerkleError::NotInBlock)?;

    let mut level: Vec<String> = ballots.iter().map(Ballot::leaf_hash).collect();
    let mut steps = Vec::new();
    while level.len() > 1 {
        let padded = pad_level(&level);
        let (sibling, side) = if index % 2 == 0 {
            (padded[index + 1].clone(), Side::Right)
        } else {
            (padded[index - 1].clone(), Side::Left)
        };
        steps.push(ProofStep { hash: sibling, side });
        index /= 2;
        level = next_level(&level);
    }
    Ok(steps)
}

/// Fold a ballot's leaf hash through a proof and compare with the root.
pub fn verify_proof(ballot: &Ballot, steps: &[ProofStep], root: &str) -> bool {
    let mut current = ballot.leaf_hash();
    for step in steps {
        current = match step.side {
            Side::Right => combine(&current, &step.hash),
            Side::Left => combine(&step.hash, &current),
        };
    }
    current == root
}

fn combine(left: &str, right: &str) -> String {
    sha256_hex(format!("{left}{right}").as_bytes())
}

fn pad_level(level: &[String]) -> Vec<String> {
    let mut padded = level.to_vec();
    if padded.len() % 2 != 0 {
        padded.push(padded.last().expect("non-empty level").clone());
    }
    padded
}

fn next_level(level: &[String]) -> Vec<String> {
    let padded = pad_level(level);
    padded
        .chunks(2)
        .map(|pair| combine(&pair[0], &pair[1]))
        .collect()
}
