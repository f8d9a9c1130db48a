//! Seam traits implemented above the foundation layer.
//!
//! The mempool deduplicates against the committed ledger and the persistent
//! used-token set without depending on the chain or storage crates; those
//! implement these traits instead.

use thiserror::Error;

/// Failure talking to the persistent token store.
#[derive(Debug, Error)]
#[error("token store failure: {0}")]
pub struct TokenStoreError(pub String);

/// Read-only view of the committed ledger used for admission checks.
pub trait LedgerIndex: Send + Sync {
    /// Whether a ballot with this identifier is already committed.
    fn contains_ballot(&self, ballot_id: &str) -> bool;

    /// Whether this voter already has a committed VOTE ballot.
    fn has_voter_voted(&self, voter_id: &str) -> bool;
}

/// Durable set of spent anonymous-token hashes.
pub trait TokenStore: Send + Sync {
    fn is_used(&self, token_hash: &str) -> Result<bool, TokenStoreError>;
    fn mark_used(&self, token_hash: &str) -> Result<(), TokenStoreError>;
}
