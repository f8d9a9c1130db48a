//! Request and response types for the HTTP surface.

use serde::{Deserialize, Serialize};
use urna_types::{Ballot, Block, NodeId};

// ═══════════════════════════════════════════════════════════════════════════
// Votes
// ═══════════════════════════════════════════════════════════════════════════

/// Request body for `POST /vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub voter_id: String,
    pub candidate_id: String,
}

/// Response for `POST /vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Identifier of the ballot built from this request.
    pub transaction_id: String,
    /// `pending_consensus`, `forwarded_to_primary` or `duplicate`.
    pub status: String,
    pub message: String,
    /// Whether this replica handled the vote as primary or backup.
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_count: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Testing controls
// ═══════════════════════════════════════════════════════════════════════════

/// Request body for `POST /pbft/behavior`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorRequest {
    /// `honest`, `malicious` or `crash`.
    pub behavior: String,
    #[serde(default)]
    pub malicious_rate: f64,
}

/// Response for `POST /pbft/behavior`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorResponse {
    pub status: String,
    pub node_id: NodeId,
    pub behavior: String,
    pub malicious_rate: f64,
}

/// Response for `POST /pbft/start-consensus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConsensusResponse {
    pub status: String,
    pub node_id: NodeId,
    pub pending_count: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// Chain reads
// ═══════════════════════════════════════════════════════════════════════════

/// Response for `GET /blockchain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResponse {
    pub blocks: Vec<Block>,
}

/// Response for `GET /blockchain/genesis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisResponse {
    pub hash: String,
    pub height: u64,
    pub timestamp: String,
    pub prev_hash: String,
}

/// Response for `GET /blockchain/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStateResponse {
    pub height: u64,
    pub last_hash: String,
    pub block_hashes: Vec<String>,
    pub node_id: NodeId,
}

/// Response for `GET /blockchain/pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResponse {
    pub pending_count: usize,
    pub transactions: Vec<Ballot>,
    pub node_id: NodeId,
    pub is_primary: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// Misc
// ═══════════════════════════════════════════════════════════════════════════

/// Response for `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Generic error body for 4xx/5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
