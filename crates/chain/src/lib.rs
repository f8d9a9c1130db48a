//! The committed ballot chain.
//!
//! An append-only, hash-linked sequence of blocks starting at genesis. The
//! chain validates every append (index continuity, link integrity, header
//! hash, Merkle root) and maintains the indexes consensus needs for ballot
//! admission: committed ballot identifiers and voters with a committed VOTE
//! ballot.
//!
//! Blocks are appended exactly once in index order and never mutated or
//! reordered. Persistence lives above this crate; the chain itself is pure
//! in-memory state restored from storage at startup.

mod chain;

pub use chain::{Chain, ChainError, SharedChain};
