//! HTTP peer transport.
//!
//! Consensus messages are POSTed as JSON to each peer's `/pbft/message`
//! endpoint. Delivery is fire-and-forget: each peer has a bounded queue
//! drained by its own sender task with a small retry budget. On overflow
//! messages are dropped; the protocol's redundancy (at-least-once delivery,
//! re-evaluated thresholds) recovers.
//!
//! The same module carries the client-side plumbing of the vote path:
//! primary discovery by polling peer status and the forward of a vote to
//! the discovered primary.

use crate::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use urna_types::{NodeEntry, NodeId, PbftMessage};

const PEER_QUEUE_DEPTH: usize = 256;
const RETRY_BUDGET: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("no primary discovered among peers")]
    NoPrimary,
}

/// Outbound fan-out to the peer set.
pub struct PeerTransport {
    queues: HashMap<NodeId, mpsc::Sender<PbftMessage>>,
}

impl PeerTransport {
    /// Spawn one sender task per peer.
    pub fn start(peers: Vec<NodeEntry>, client: reqwest::Client) -> Self {
        let mut queues = HashMap::new();
        for peer in peers {
            let (tx, mut rx) = mpsc::channel::<PbftMessage>(PEER_QUEUE_DEPTH);
            let client = client.clone();
            let url = format!("{}/pbft/message", peer.base_url());
            let peer_id = peer.id.clone();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    deliver(&client, &url, &peer_id, &message).await;
                }
            });
            queues.insert(peer.id, tx);
        }
        Self { queues }
    }

    /// Queue a message for every peer.
    pub fn broadcast(&self, message: &PbftMessage) {
        for (peer_id, queue) in &self.queues {
            match queue.try_send(message.clone()) {
                Ok(()) => metrics::record_message_sent(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer = %peer_id, kind = message.type_name(), "peer queue full, dropping message");
                    metrics::record_message_dropped();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(peer = %peer_id, "peer sender stopped");
                }
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.queues.len()
    }
}

/// Best-effort delivery with a bounded retry budget.
async fn deliver(client: &reqwest::Client, url: &str, peer_id: &NodeId, message: &PbftMessage) {
    for attempt in 1..=RETRY_BUDGET {
        match client.post(url).json(message).send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                debug!(peer = %peer_id, status = %resp.status(), attempt, "peer rejected message");
            }
            Err(err) => {
                debug!(peer = %peer_id, error = %err, attempt, "peer delivery failed");
            }
        }
        if attempt < RETRY_BUDGET {
            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
    }
    debug!(peer = %peer_id, kind = message.type_name(), "retry budget exhausted, dropping message");
}

#[derive(Debug, serde::Deserialize)]
struct PeerStatus {
    is_primary: bool,
}

/// Find the current primary by polling each peer's status endpoint.
pub async fn discover_primary(
    client: &reqwest::Client,
    peers: &[NodeEntry],
) -> Result<NodeEntry, NetworkError> {
    for peer in peers {
        let url = format!("{}/pbft/status", peer.base_url());
        let response = match client.get(&url).timeout(STATUS_TIMEOUT).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(peer = %peer.id, error = %err, "status poll failed");
                continue;
            }
        };
        match response.json::<PeerStatus>().await {
            Ok(status) if status.is_primary => return Ok(peer.clone()),
            Ok(_) => {}
            Err(err) => debug!(peer = %peer.id, error = %err, "malformed status response"),
        }
    }
    Err(NetworkError::NoPrimary)
}

/// Forward a client submission to the primary's vote endpoint.
pub async fn forward_to_primary<T: Serialize>(
    client: &reqwest::Client,
    primary: &NodeEntry,
    body: &T,
) -> Result<(), NetworkError> {
    let url = format!("{}/vote", primary.base_url());
    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(|e| NetworkError::PeerUnreachable(e.to_string()))?;
    if !response.status().is_success() {
        return Err(NetworkError::PeerUnreachable(format!(
            "primary {} answered {}",
            primary.id,
            response.status()
        )));
    }
    metrics::record_vote_forwarded();
    Ok(())
}
