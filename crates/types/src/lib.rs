//! Core types for the Urna ballot ledger.
//!
//! This crate provides the foundational types used throughout the replicated
//! ledger:
//!
//! - **Primitives**: SHA-256 hex hashing, replica identifiers
//! - **Ledger types**: Ballot, Block, Merkle tree and inclusion proofs
//! - **Protocol types**: the PBFT wire message set
//! - **Configuration**: the static network membership file
//! - **Seam traits**: `LedgerIndex` and `TokenStore`, implemented above this
//!   crate by the chain and the storage layer
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.
//!
//! All hashing is canonical: every replica produces byte-identical encodings
//! for ballots and block headers, so hashes agree across the network.

mod ballot;
mod block;
mod hash;
mod message;
mod network;
mod traits;

pub mod merkle;

pub use ballot::{Ballot, BallotKind, TOKEN_HASH_KEY};
pub use block::{current_timestamp, Block, GENESIS_TIMESTAMP};
pub use hash::sha256_hex;
pub use merkle::{MerkleError, ProofStep, Side};
pub use message::PbftMessage;
pub use network::{ConfigError, NetworkConfig, NodeEntry};
pub use traits::{LedgerIndex, TokenStore, TokenStoreError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a replica in the fixed membership set.
///
/// Identifiers are totally ordered strings; the primary of a view is the
/// replica with the minimum identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}
