//! Ballot: the transaction type of the ledger.

use crate::hash::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detail key under which anonymous ballots carry their token hash.
pub const TOKEN_HASH_KEY: &str = "token_hash";

/// Payload tag distinguishing ballot types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BallotKind {
    /// A named vote cast by a registered voter.
    #[serde(rename = "VOTE")]
    Vote,
    /// An anonymous vote authorized by a one-time token.
    #[serde(rename = "ANON_VOTE")]
    AnonVote,
}

impl BallotKind {
    /// Wire/canonical tag for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            BallotKind::Vote => "VOTE",
            BallotKind::AnonVote => "ANON_VOTE",
        }
    }
}

/// One ballot: a single vote for a candidate.
///
/// The identifier is derived deterministically from the ballot content and
/// uniquely determines the ballot; two ballots with equal `id` are duplicates.
///
/// # Canonical encoding
///
/// The canonical byte encoding used for Merkle leaves concatenates, in fixed
/// order: `id`, `voter_id`, `candidate_id`, the kind tag, then every detail
/// pair in ascending key order (`BTreeMap` iteration order), all UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    /// Unique identifier: lowercase hex SHA-256 over the ballot content.
    pub id: String,

    /// Voter identifier; empty for anonymous ballots.
    #[serde(default)]
    pub voter_id: String,

    /// Candidate the vote is for.
    pub candidate_id: String,

    /// Payload tag.
    pub kind: BallotKind,

    /// Auxiliary detail mapping (ordered for deterministic encoding).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, String>,
}

impl Ballot {
    /// Create a named vote ballot. The identifier hashes voter, candidate
    /// and kind tag.
    pub fn vote(voter_id: impl Into<String>, candidate_id: impl Into<String>) -> Self {
        let voter_id = voter_id.into();
        let candidate_id = candidate_id.into();
        let id = derive_id(&voter_id, &candidate_id, BallotKind::Vote.tag());
        Self {
            id,
            voter_id,
            candidate_id,
            kind: BallotKind::Vote,
            detail: BTreeMap::new(),
        }
    }

    /// Create an anonymous ballot authorized by a one-time token. The voter
    /// field stays empty; the token hash rides in the detail mapping and
    /// seeds the identifier.
    pub fn anonymous(token_hash: impl Into<String>, candidate_id: impl Into<String>) -> Self {
        let token_hash = token_hash.into();
        let candidate_id = candidate_id.into();
        let id = derive_id(&token_hash, &candidate_id, BallotKind::AnonVote.tag());
        let mut detail = BTreeMap::new();
        detail.insert(TOKEN_HASH_KEY.to_string(), token_hash);
        Self {
            id,
            voter_id: String::new(),
            candidate_id,
            kind: BallotKind::AnonVote,
            detail,
        }
    }

    /// The identifier this ballot's content should carry under the
    /// identifier rule. Used by validation to reject forged ids.
    pub fn expected_id(&self) -> String {
        match self.kind {
            BallotKind::Vote => derive_id(&self.voter_id, &self.candidate_id, self.kind.tag()),
            BallotKind::AnonVote => {
                let token = self.token_hash().unwrap_or_default();
                derive_id(token, &self.candidate_id, self.kind.tag())
            }
        }
    }

    /// The anonymous-token hash, if this ballot carries one.
    pub fn token_hash(&self) -> Option<&str> {
        self.detail.get(TOKEN_HASH_KEY).map(String::as_str)
    }

    /// Canonical byte encoding (fixed field order, sorted detail pairs).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.id.len() + self.voter_id.len() + self.candidate_id.len() + 16,
        );
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(self.voter_id.as_bytes());
        out.extend_from_slice(self.candidate_id.as_bytes());
        out.extend_from_slice(self.kind.tag().as_bytes());
        for (key, value) in &self.detail {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        out
    }

    /// Merkle leaf hash: SHA-256 over the canonical bytes.
    pub fn leaf_hash(&self) -> String {
        sha256_hex(&self.canonical_bytes())
    }
}

fn derive_id(subject: &str, candidate_id: &str, tag: &str) -> String {
    sha256_hex(format!("{subject}{candidate_id}{tag}").as_bytes())
}
