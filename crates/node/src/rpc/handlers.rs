//! HTTP request handlers.

use super::types::*;
use crate::metrics;
use crate::network;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use urna_chain::SharedChain;
use urna_core::{Behavior, Event};
use urna_mempool::Mempool;
use urna_pbft::EngineStatus;
use urna_types::{Ballot, NodeEntry, NodeId, PbftMessage};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct RpcState {
    pub node_id: NodeId,
    /// Engine snapshot maintained by the runner.
    pub status: Arc<RwLock<EngineStatus>>,
    pub chain: SharedChain,
    pub mempool: Arc<Mempool>,
    /// Channel into the consensus event loop.
    pub events: mpsc::Sender<Event>,
    pub peers: Arc<Vec<NodeEntry>>,
    pub http: reqwest::Client,
}

fn engine_unavailable() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("consensus engine is shutting down")),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// Peer protocol
// ═══════════════════════════════════════════════════════════════════════════

/// Handler for `POST /pbft/message` - the peer consensus endpoint.
pub async fn pbft_message_handler(
    State(state): State<RpcState>,
    Json(message): Json<PbftMessage>,
) -> impl IntoResponse {
    debug!(kind = message.type_name(), sender = %message.sender(), "peer message received");
    match state.events.send(Event::MessageReceived { message }).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => engine_unavailable().into_response(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Status & testing controls
// ═══════════════════════════════════════════════════════════════════════════

/// Handler for `GET /pbft/status`.
pub async fn pbft_status_handler(State(state): State<RpcState>) -> impl IntoResponse {
    Json(state.status.read().await.clone())
}

/// Handler for `POST /pbft/start-consensus` (primary only, testing).
pub async fn start_consensus_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let status = state.status.read().await;
    if !status.is_primary {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("only the primary can start consensus")),
        )
            .into_response();
    }
    drop(status);

    let pending_count = state.mempool.pending_count();
    if pending_count == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "no pending ballots available for consensus",
            )),
        )
            .into_response();
    }

    match state.events.send(Event::StartConsensus).await {
        Ok(()) => Json(StartConsensusResponse {
            status: "consensus_started".to_string(),
            node_id: state.node_id.clone(),
            pending_count,
        })
        .into_response(),
        Err(_) => engine_unavailable().into_response(),
    }
}

/// Handler for `POST /pbft/behavior` (testing).
pub async fn behavior_handler(
    State(state): State<RpcState>,
    Json(request): Json<BehaviorRequest>,
) -> impl IntoResponse {
    let behavior = match request.behavior.to_lowercase().as_str() {
        "honest" => Behavior::Honest,
        "malicious" => {
            if !(0.0..=1.0).contains(&request.malicious_rate) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new("malicious_rate must be within [0, 1]")),
                )
                    .into_response();
            }
            Behavior::Malicious {
                rate: request.malicious_rate,
            }
        }
        "crash" => Behavior::Crash,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "invalid behavior, use: honest, malicious or crash",
                )),
            )
                .into_response();
        }
    };

    match state.events.send(Event::BehaviorChanged { behavior }).await {
        Ok(()) => Json(BehaviorResponse {
            status: "success".to_string(),
            node_id: state.node_id.clone(),
            behavior: behavior.name().to_string(),
            malicious_rate: behavior.malicious_rate(),
        })
        .into_response(),
        Err(_) => engine_unavailable().into_response(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Vote submission
// ═══════════════════════════════════════════════════════════════════════════

/// Handler for `POST /vote`.
///
/// On the primary the ballot is admitted to the mempool; a backup forwards
/// the request to the discovered primary and reports that to the client.
pub async fn vote_handler(
    State(state): State<RpcState>,
    Json(request): Json<VoteRequest>,
) -> impl IntoResponse {
    if request.voter_id.is_empty() || request.candidate_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("voter_id and candidate_id are required")),
        )
            .into_response();
    }

    let ballot = Ballot::vote(request.voter_id.clone(), request.candidate_id.clone());
    let transaction_id = ballot.id.clone();
    let is_primary = state.status.read().await.is_primary;

    if !is_primary {
        info!(ballot_id = %transaction_id, "not primary, forwarding vote");
        let client = state.http.clone();
        let peers = state.peers.clone();
        tokio::spawn(async move {
            match network::discover_primary(&client, &peers).await {
                Ok(primary) => {
                    if let Err(err) =
                        network::forward_to_primary(&client, &primary, &request).await
                    {
                        warn!(error = %err, "vote forwarding failed");
                    }
                }
                Err(err) => warn!(error = %err, "primary discovery failed"),
            }
        });

        return Json(VoteResponse {
            transaction_id,
            status: "forwarded_to_primary".to_string(),
            message: "vote forwarded to the primary for consensus".to_string(),
            node_type: "backup".to_string(),
            pending_count: None,
        })
        .into_response();
    }

    match state.mempool.admit(ballot) {
        Ok(()) => {
            let pending_count = state.mempool.pending_count();
            metrics::record_ballot_admitted(pending_count);
            if state.events.send(Event::BallotAdmitted).await.is_err() {
                return engine_unavailable().into_response();
            }
            Json(VoteResponse {
                transaction_id,
                status: "pending_consensus".to_string(),
                message: "vote submitted for consensus".to_string(),
                node_type: "primary".to_string(),
                pending_count: Some(pending_count),
            })
            .into_response()
        }
        Err(err) => {
            metrics::record_ballot_rejected();
            debug!(ballot_id = %transaction_id, error = %err, "ballot rejected at admission");
            (
                StatusCode::CONFLICT,
                Json(VoteResponse {
                    transaction_id,
                    status: "duplicate".to_string(),
                    message: err.to_string(),
                    node_type: "primary".to_string(),
                    pending_count: None,
                }),
            )
                .into_response()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Chain reads
// ═══════════════════════════════════════════════════════════════════════════

/// Handler for `GET /blockchain`.
pub async fn blockchain_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let blocks = state.chain.read().blocks().to_vec();
    Json(ChainResponse { blocks })
}

/// Handler for `GET /blockchain/genesis`.
pub async fn genesis_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let chain = state.chain.read();
    let genesis = chain.genesis();
    Json(GenesisResponse {
        hash: genesis.hash.clone(),
        height: genesis.index,
        timestamp: genesis.timestamp.clone(),
        prev_hash: genesis.prev_hash.clone(),
    })
}

/// Handler for `GET /blockchain/state`.
pub async fn chain_state_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let chain = state.chain.read();
    Json(ChainStateResponse {
        height: chain.height(),
        last_hash: chain.tip().hash.clone(),
        block_hashes: chain.block_hashes(),
        node_id: state.node_id.clone(),
    })
}

/// Handler for `GET /blockchain/pending`.
pub async fn pending_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let transactions = state.mempool.snapshot();
    let is_primary = state.status.read().await.is_primary;
    Json(PendingResponse {
        pending_count: transactions.len(),
        transactions,
        node_id: state.node_id.clone(),
        is_primary,
    })
}

/// Handler for `GET /tally` - vote counts per candidate.
pub async fn tally_handler(State(state): State<RpcState>) -> impl IntoResponse {
    Json(state.chain.read().tally())
}

// ═══════════════════════════════════════════════════════════════════════════
// Health & metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Handler for `GET /health` - liveness probe.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Handler for `GET /metrics` - Prometheus metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = ?e, "failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics".to_string(),
        )
            .into_response();
    }

    (
        [(
            axum::http::header::CONTENT_TYPE,
            encoder.format_type().to_string(),
        )],
        buffer,
    )
        .into_response()
}
