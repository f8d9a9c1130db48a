//! Route configuration for the HTTP surface.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};

/// Create the full router with all endpoints.
pub fn create_router(state: RpcState) -> Router {
    Router::new()
        // Peer protocol
        .route("/pbft/message", post(pbft_message_handler))
        // Status & testing controls
        .route("/pbft/status", get(pbft_status_handler))
        .route("/pbft/start-consensus", post(start_consensus_handler))
        .route("/pbft/behavior", post(behavior_handler))
        // Client surface
        .route("/vote", post(vote_handler))
        .route("/tally", get(tally_handler))
        // Chain reads
        .route("/blockchain", get(blockchain_handler))
        .route("/blockchain/genesis", get(genesis_handler))
        .route("/blockchain/state", get(chain_state_handler))
        .route("/blockchain/pending", get(pending_handler))
        // Probes
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::*;
    use crate::storage::Storage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, RwLock};
    use tower::ServiceExt;
    use urna_chain::{Chain, SharedChain};
    use urna_core::Event;
    use urna_mempool::Mempool;
    use urna_pbft::{PbftConfig, PbftState};
    use urna_types::{LedgerIndex, NodeId, TokenStore};

    struct TestRig {
        state: RpcState,
        /// Events the handlers push into the (absent) runner.
        events_rx: mpsc::Receiver<Event>,
        _dir: TempDir,
    }

    fn test_rig(node_id: &str) -> TestRig {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("blockchain.db")).unwrap());
        let chain = SharedChain::new(Chain::bootstrap());
        let mempool = Arc::new(Mempool::new(
            Arc::new(chain.clone()) as Arc<dyn LedgerIndex>,
            storage as Arc<dyn TokenStore>,
        ));
        let nodes: Vec<NodeId> = (1..=4).map(|i| NodeId(format!("node{i}"))).collect();
        let engine = PbftState::new(
            NodeId::from(node_id),
            nodes,
            chain.clone(),
            mempool.clone(),
            PbftConfig::default(),
        );
        let (events, events_rx) = mpsc::channel(64);

        let state = RpcState {
            node_id: NodeId::from(node_id),
            status: Arc::new(RwLock::new(engine.status())),
            chain,
            mempool,
            events,
            peers: Arc::new(Vec::new()),
            http: reqwest::Client::new(),
        };
        TestRig {
            state,
            events_rx,
            _dir: dir,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(router: Router, uri: &str) -> T {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let rig = test_rig("node1");
        let health: HealthResponse = get_json(create_router(rig.state), "/health").await;
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn genesis_is_exposed() {
        let rig = test_rig("node1");
        let expected = rig.state.chain.read().genesis().hash.clone();
        let genesis: GenesisResponse =
            get_json(create_router(rig.state), "/blockchain/genesis").await;
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.hash, expected);
        assert!(genesis.prev_hash.is_empty());
    }

    #[tokio::test]
    async fn chain_state_reports_height_and_tip() {
        let rig = test_rig("node2");
        let state: ChainStateResponse =
            get_json(create_router(rig.state), "/blockchain/state").await;
        assert_eq!(state.height, 1);
        assert_eq!(state.block_hashes.len(), 1);
        assert_eq!(state.last_hash, state.block_hashes[0]);
        assert_eq!(state.node_id, NodeId::from("node2"));
    }

    #[tokio::test]
    async fn status_reflects_the_engine_snapshot() {
        let rig = test_rig("node1");
        let status: serde_json::Value = get_json(create_router(rig.state), "/pbft/status").await;
        assert_eq!(status["id"], "node1");
        assert_eq!(status["is_primary"], true);
        assert_eq!(status["state"], "idle");
        assert_eq!(status["view"], 0);
        assert_eq!(status["sequence_num"], 1);
        assert_eq!(status["peer_count"], 3);
    }

    #[tokio::test]
    async fn vote_on_primary_is_admitted() {
        let mut rig = test_rig("node1");
        let router = create_router(rig.state.clone());

        let request = VoteRequest {
            voter_id: "alice".to_string(),
            candidate_id: "candidate-a".to_string(),
        };
        let response = router.oneshot(post_json("/vote", &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let vote: VoteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(vote.status, "pending_consensus");
        assert_eq!(vote.node_type, "primary");
        assert_eq!(vote.pending_count, Some(1));
        assert_eq!(rig.state.mempool.pending_count(), 1);

        // The admission poked the engine loop.
        let event = rig.events_rx.try_recv().unwrap();
        assert!(matches!(event, Event::BallotAdmitted));
    }

    #[tokio::test]
    async fn duplicate_vote_is_conflict() {
        let rig = test_rig("node1");
        let router = create_router(rig.state.clone());
        let request = VoteRequest {
            voter_id: "bob".to_string(),
            candidate_id: "candidate-a".to_string(),
        };

        let first = router
            .clone()
            .oneshot(post_json("/vote", &request))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router.oneshot(post_json("/vote", &request)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = axum::body::to_bytes(second.into_body(), 1 << 20)
            .await
            .unwrap();
        let vote: VoteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(vote.status, "duplicate");
        assert_eq!(rig.state.mempool.pending_count(), 1);
    }

    #[tokio::test]
    async fn empty_vote_fields_are_rejected() {
        let rig = test_rig("node1");
        let request = VoteRequest {
            voter_id: String::new(),
            candidate_id: "candidate-a".to_string(),
        };
        let response = create_router(rig.state)
            .oneshot(post_json("/vote", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn vote_on_backup_reports_forwarding() {
        let rig = test_rig("node2");
        let request = VoteRequest {
            voter_id: "carol".to_string(),
            candidate_id: "candidate-b".to_string(),
        };
        let response = create_router(rig.state.clone())
            .oneshot(post_json("/vote", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let vote: VoteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(vote.status, "forwarded_to_primary");
        assert_eq!(vote.node_type, "backup");
        // Backups never admit locally.
        assert_eq!(rig.state.mempool.pending_count(), 0);
    }

    #[tokio::test]
    async fn peer_message_is_fed_into_the_event_loop() {
        let mut rig = test_rig("node2");
        let message = urna_types::PbftMessage::Prepare {
            view: 0,
            sequence: 1,
            node_id: NodeId::from("node3"),
            block_hash: "hash".to_string(),
            timestamp: urna_types::current_timestamp(),
            signature: None,
        };
        let response = create_router(rig.state.clone())
            .oneshot(post_json("/pbft/message", &message))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = rig.events_rx.try_recv().unwrap();
        assert!(matches!(event, Event::MessageReceived { .. }));
    }

    #[tokio::test]
    async fn malformed_peer_message_is_client_error() {
        let rig = test_rig("node2");
        let request = Request::builder()
            .method("POST")
            .uri("/pbft/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"type":"NEW_VIEW"}"#))
            .unwrap();
        let response = create_router(rig.state).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn start_consensus_requires_primary() {
        let rig = test_rig("node2");
        let response = create_router(rig.state)
            .oneshot(post_json("/pbft/start-consensus", &serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn start_consensus_requires_pending_ballots() {
        let rig = test_rig("node1");
        let response = create_router(rig.state)
            .oneshot(post_json("/pbft/start-consensus", &serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn behavior_override_round_trips() {
        let mut rig = test_rig("node1");
        let request = BehaviorRequest {
            behavior: "malicious".to_string(),
            malicious_rate: 0.5,
        };
        let response = create_router(rig.state.clone())
            .oneshot(post_json("/pbft/behavior", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = rig.events_rx.try_recv().unwrap();
        assert!(matches!(event, Event::BehaviorChanged { .. }));
    }

    #[tokio::test]
    async fn unknown_behavior_is_rejected() {
        let rig = test_rig("node1");
        let request = BehaviorRequest {
            behavior: "sleepy".to_string(),
            malicious_rate: 0.0,
        };
        let response = create_router(rig.state)
            .oneshot(post_json("/pbft/behavior", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn out_of_range_malicious_rate_is_rejected() {
        let rig = test_rig("node1");
        let request = BehaviorRequest {
            behavior: "malicious".to_string(),
            malicious_rate: 1.5,
        };
        let response = create_router(rig.state)
            .oneshot(post_json("/pbft/behavior", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pending_lists_admitted_ballots() {
        let rig = test_rig("node1");
        rig.state
            .mempool
            .admit(urna_types::Ballot::vote("dave", "candidate-a"))
            .unwrap();
        let pending: PendingResponse =
            get_json(create_router(rig.state), "/blockchain/pending").await;
        assert_eq!(pending.pending_count, 1);
        assert_eq!(pending.transactions[0].voter_id, "dave");
        assert!(pending.is_primary);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let rig = test_rig("node1");
        let response = create_router(rig.state)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
