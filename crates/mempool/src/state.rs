//! Mempool state.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use urna_types::{Ballot, BallotKind, LedgerIndex, TokenStore, TokenStoreError};

#[derive(Debug, Error)]
pub enum MempoolError {
    /// The ballot identifier is already pending or committed.
    #[error("ballot {0} already known")]
    DuplicateBallot(String),

    /// The voter already has a VOTE ballot pending or committed.
    #[error("voter {0} has already voted")]
    VoterAlreadyVoted(String),

    /// The anonymous token was already spent.
    #[error("anonymous token already spent")]
    UsedToken,

    /// The durable token store failed.
    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

#[derive(Debug, Default)]
struct Inner {
    /// FIFO order of admission.
    pending: Vec<Ballot>,
    /// Identifiers of pending ballots.
    ids: HashSet<String>,
    /// Voters with a pending VOTE ballot.
    voters: HashSet<String>,
}

/// Thread-safe admission queue.
pub struct Mempool {
    inner: Mutex<Inner>,
    ledger: Arc<dyn LedgerIndex>,
    tokens: Arc<dyn TokenStore>,
}

impl Mempool {
    pub fn new(ledger: Arc<dyn LedgerIndex>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ledger,
            tokens,
        }
    }

    /// Admit a ballot if it is not a duplicate and its token is unspent.
    pub fn admit(&self, ballot: Ballot) -> Result<(), MempoolError> {
        if let Some(token) = ballot.token_hash() {
            if self.tokens.is_used(token)? {
                return Err(MempoolError::UsedToken);
            }
        }

        let mut inner = self.inner.lock();
        if inner.ids.contains(&ballot.id) || self.ledger.contains_ballot(&ballot.id) {
            return Err(MempoolError::DuplicateBallot(ballot.id));
        }
        if ballot.kind == BallotKind::Vote {
            if inner.voters.contains(&ballot.voter_id)
                || self.ledger.has_voter_voted(&ballot.voter_id)
            {
                return Err(MempoolError::VoterAlreadyVoted(ballot.voter_id));
            }
            inner.voters.insert(ballot.voter_id.clone());
        }

        debug!(ballot_id = %ballot.id, pending = inner.pending.len() + 1, "ballot admitted");
        inner.ids.insert(ballot.id.clone());
        inner.pending.push(ballot);
        Ok(())
    }

    /// Copy of the pending sequence in FIFO order.
    pub fn snapshot(&self) -> Vec<Ballot> {
        self.inner.lock().pending.clone()
    }

    /// Remove the given ballots by identifier (after commitment).
    pub fn drain(&self, ballots: &[Ballot]) {
        let committed: HashSet<&str> = ballots.iter().map(|b| b.id.as_str()).collect();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.pending.retain(|b| !committed.contains(b.id.as_str()));

        // Rebuild the secondary indexes from what is left.
        inner.ids = inner.pending.iter().map(|b| b.id.clone()).collect();
        inner.voters = inner
            .pending
            .iter()
            .filter(|b| b.kind == BallotKind::Vote)
            .map(|b| b.voter_id.clone())
            .collect();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Record an anonymous token as spent, durably.
    pub fn mark_used(&self, token_hash: &str) -> Result<(), MempoolError> {
        self.tokens.mark_used(token_hash)?;
        Ok(())
    }

    /// Whether an anonymous token has been spent.
    pub fn is_used(&self, token_hash: &str) -> Result<bool, MempoolError> {
        Ok(self.tokens.is_used(token_hash)?)
    }
}
