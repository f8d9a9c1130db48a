//! End-to-end tests: four in-process replicas over localhost HTTP.
//!
//! Each test starts a full cluster (RocksDB storage in a temp directory,
//! axum HTTP servers on ephemeral ports, reqwest peer transport) and drives
//! it through the client endpoints only. Tests are `#[serial]` to avoid
//! port churn and interleaved logs.

use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};
use urna_node::{start_node, NodeConfig, NodeHandle};
use urna_pbft::PbftConfig;
use urna_types::{merkle, Ballot, Block, NetworkConfig, NodeEntry, NodeId};

const COMMIT_TIMEOUT: Duration = Duration::from_secs(10);

struct Cluster {
    handles: Vec<NodeHandle>,
    client: reqwest::Client,
    _dir: TempDir,
}

/// Reserve ephemeral localhost ports by binding and dropping listeners.
async fn free_ports(n: usize) -> Vec<u16> {
    let mut listeners = Vec::new();
    for _ in 0..n {
        listeners.push(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

async fn start_cluster(n: usize) -> Cluster {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let ports = free_ports(n).await;
    let network = NetworkConfig {
        nodes: (0..n)
            .map(|i| NodeEntry {
                id: NodeId(format!("node{}", i + 1)),
                address: "127.0.0.1".to_string(),
                port: ports[i],
            })
            .collect(),
    };

    let dir = TempDir::new().unwrap();
    let data_root: PathBuf = dir.path().to_path_buf();
    // Fast timers so tests complete quickly.
    let pbft = PbftConfig::default()
        .with_proposal_interval(Duration::from_secs(2))
        .with_batch_delay(Duration::from_millis(100));

    let mut handles = Vec::new();
    for entry in &network.nodes {
        let config = NodeConfig::resolve(
            entry.id.clone(),
            network.clone(),
            None,
            &data_root,
            pbft.clone(),
        )
        .unwrap();
        handles.push(start_node(config).await.unwrap());
    }

    Cluster {
        handles,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

impl Cluster {
    fn url(&self, replica: usize, path: &str) -> String {
        format!("{}{path}", self.handles[replica].base_url())
    }

    async fn get_json(&self, replica: usize, path: &str) -> serde_json::Value {
        self.client
            .get(self.url(replica, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn post_json(
        &self,
        replica: usize,
        path: &str,
        body: &serde_json::Value,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let response = self
            .client
            .post(self.url(replica, path))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json().await.unwrap();
        (status, body)
    }

    async fn height(&self, replica: usize) -> u64 {
        self.get_json(replica, "/blockchain/state").await["height"]
            .as_u64()
            .unwrap()
    }

    /// Wait until the listed replicas report the expected height.
    async fn wait_for_height(&self, replicas: &[usize], expected: u64) {
        timeout(COMMIT_TIMEOUT, async {
            loop {
                let mut done = true;
                for &replica in replicas {
                    if self.height(replica).await < expected {
                        done = false;
                        break;
                    }
                }
                if done {
                    return;
                }
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("replicas {replicas:?} never reached height {expected}"));
    }

    async fn last_hashes(&self, replicas: &[usize]) -> Vec<String> {
        let mut hashes = Vec::new();
        for &replica in replicas {
            let state = self.get_json(replica, "/blockchain/state").await;
            hashes.push(state["last_hash"].as_str().unwrap().to_string());
        }
        hashes
    }

    async fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown();
            handle.join().await.unwrap();
        }
    }
}

fn vote(voter: &str, candidate: &str) -> serde_json::Value {
    serde_json::json!({ "voter_id": voter, "candidate_id": candidate })
}

#[tokio::test]
#[serial]
async fn common_genesis_across_fresh_replicas() {
    let cluster = start_cluster(4).await;

    let mut hashes = Vec::new();
    for replica in 0..4 {
        let genesis = cluster.get_json(replica, "/blockchain/genesis").await;
        assert_eq!(genesis["height"], 0);
        assert_eq!(genesis["prev_hash"], "");
        hashes.push(genesis["hash"].as_str().unwrap().to_string());
    }
    assert!(
        hashes.iter().all(|h| h == &hashes[0]),
        "genesis hashes diverged: {hashes:?}"
    );

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn four_honest_replicas_commit_a_single_vote() {
    let cluster = start_cluster(4).await;

    let (status, body) = cluster.post_json(0, "/vote", &vote("alice", "A")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["status"], "pending_consensus");
    assert_eq!(body["node_type"], "primary");

    cluster.wait_for_height(&[0, 1, 2, 3], 2).await;
    let hashes = cluster.last_hashes(&[0, 1, 2, 3]).await;
    assert!(hashes.iter().all(|h| h == &hashes[0]), "tips diverged: {hashes:?}");

    let tally = cluster.get_json(2, "/tally").await;
    assert_eq!(tally["A"], 1);

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn vote_submitted_to_backup_is_forwarded_and_commits() {
    let cluster = start_cluster(4).await;

    let (status, body) = cluster.post_json(2, "/vote", &vote("bob", "B")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["status"], "forwarded_to_primary");
    assert_eq!(body["node_type"], "backup");

    cluster.wait_for_height(&[0, 1, 2, 3], 2).await;
    let tally = cluster.get_json(0, "/tally").await;
    assert_eq!(tally["B"], 1);

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn one_byzantine_replica_cannot_prevent_commitment() {
    let cluster = start_cluster(4).await;

    let (status, _) = cluster
        .post_json(
            3,
            "/pbft/behavior",
            &serde_json::json!({ "behavior": "malicious", "malicious_rate": 1.0 }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);

    cluster.post_json(0, "/vote", &vote("carol", "A")).await;

    // 2f+1 = 3 replicas suffice; the Byzantine one stays at genesis.
    cluster.wait_for_height(&[0, 1, 2], 2).await;
    let hashes = cluster.last_hashes(&[0, 1, 2]).await;
    assert!(hashes.iter().all(|h| h == &hashes[0]));
    assert_eq!(cluster.height(3).await, 1);

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn two_byzantine_replicas_stall_liveness_but_preserve_safety() {
    let cluster = start_cluster(4).await;

    for replica in [2, 3] {
        cluster
            .post_json(
                replica,
                "/pbft/behavior",
                &serde_json::json!({ "behavior": "malicious", "malicious_rate": 1.0 }),
            )
            .await;
    }

    cluster.post_json(0, "/vote", &vote("dave", "A")).await;

    // Give consensus ample time to (not) make progress.
    sleep(Duration::from_secs(3)).await;
    for replica in 0..4 {
        assert_eq!(
            cluster.height(replica).await,
            1,
            "replica {replica} advanced past genesis without a quorum"
        );
    }

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn duplicate_ballot_is_committed_exactly_once() {
    let cluster = start_cluster(4).await;

    let (first, _) = cluster.post_json(0, "/vote", &vote("erin", "A")).await;
    assert_eq!(first, reqwest::StatusCode::OK);
    let (second, body) = cluster.post_json(0, "/vote", &vote("erin", "A")).await;
    assert_eq!(second, reqwest::StatusCode::CONFLICT);
    assert_eq!(body["status"], "duplicate");

    cluster.wait_for_height(&[0, 1, 2, 3], 2).await;

    let chain = cluster.get_json(1, "/blockchain").await;
    let blocks: Vec<Block> = serde_json::from_value(chain["blocks"].clone()).unwrap();
    let erin_ballots: usize = blocks
        .iter()
        .flat_map(|b| &b.ballots)
        .filter(|b| b.voter_id == "erin")
        .count();
    assert_eq!(erin_ballots, 1);

    // Re-submitting after commitment is still refused.
    let (replay, _) = cluster.post_json(0, "/vote", &vote("erin", "A")).await;
    assert_eq!(replay, reqwest::StatusCode::CONFLICT);

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn committed_ballots_carry_verifiable_merkle_proofs() {
    let cluster = start_cluster(4).await;

    for (voter, candidate) in [("v1", "A"), ("v2", "B"), ("v3", "A"), ("v4", "C")] {
        let (status, _) = cluster.post_json(0, "/vote", &vote(voter, candidate)).await;
        assert_eq!(status, reqwest::StatusCode::OK);
    }

    // Wait until all four ballots are committed (one or more blocks).
    let blocks = timeout(COMMIT_TIMEOUT, async {
        loop {
            let chain = cluster.get_json(0, "/blockchain").await;
            let blocks: Vec<Block> = serde_json::from_value(chain["blocks"].clone()).unwrap();
            let committed: usize = blocks.iter().map(|b| b.ballots.len()).sum();
            if committed == 4 {
                return blocks;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("ballots never committed");

    for block in blocks.iter().filter(|b| !b.ballots.is_empty()) {
        for ballot in &block.ballots {
            let proof = merkle::proof(&block.ballots, &ballot.id).unwrap();
            assert!(
                merkle::verify_proof(ballot, &proof, &block.merkle_root),
                "proof failed for ballot {}",
                ballot.id
            );
        }
        // A fabricated ballot is not provable.
        let absent = Ballot::vote("nobody", "Z");
        assert!(matches!(
            merkle::proof(&block.ballots, &absent.id),
            Err(merkle::MerkleError::NotInBlock)
        ));
    }

    cluster.shutdown().await;
}

#[tokio::test]
#[serial]
async fn restart_preserves_the_chain() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // Single-replica cluster: f = 0, commits with its own votes.
    let ports = free_ports(1).await;
    let network = NetworkConfig {
        nodes: vec![NodeEntry {
            id: NodeId::from("node1"),
            address: "127.0.0.1".to_string(),
            port: ports[0],
        }],
    };
    let dir = TempDir::new().unwrap();
    let data_root = dir.path().to_path_buf();
    let pbft = PbftConfig::default().with_batch_delay(Duration::from_millis(50));

    let config = NodeConfig::resolve(
        NodeId::from("node1"),
        network.clone(),
        None,
        &data_root,
        pbft.clone(),
    )
    .unwrap();
    let handle = start_node(config.clone()).await.unwrap();
    let client = reqwest::Client::new();
    let base = handle.base_url();

    client
        .post(format!("{base}/vote"))
        .json(&vote("frank", "A"))
        .send()
        .await
        .unwrap();

    let tip_before = timeout(COMMIT_TIMEOUT, async {
        loop {
            let state: serde_json::Value = client
                .get(format!("{base}/blockchain/state"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if state["height"].as_u64().unwrap() >= 2 {
                return state["last_hash"].as_str().unwrap().to_string();
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("block never committed");

    handle.shutdown();
    handle.join().await.unwrap();

    // Restart on the same data directory: the chain is restored intact.
    let handle = start_node(config).await.unwrap();
    let base = handle.base_url();
    let state: serde_json::Value = client
        .get(format!("{base}/blockchain/state"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["height"], 2);
    assert_eq!(state["last_hash"].as_str().unwrap(), tip_before);

    handle.shutdown();
    handle.join().await.unwrap();
}
