//! Static network membership configuration.
//!
//! Membership is fixed for the lifetime of the deployment and loaded at
//! startup from a JSON document:
//!
//! ```json
//! { "nodes": [ { "id": "node1", "address": "127.0.0.1", "port": 8081 }, ... ] }
//! ```

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read network config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse network config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("node {0} not present in network config")]
    UnknownNode(NodeId),
    #[error("network config contains no nodes")]
    Empty,
}

/// One replica's entry in the membership file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
}

impl NodeEntry {
    /// Base HTTP URL for this replica.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// The full replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub nodes: Vec<NodeEntry>,
}

impl NetworkConfig {
    /// Load the membership file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: NetworkConfig = serde_json::from_str(&data)?;
        if config.nodes.is_empty() {
            return Err(ConfigError::Empty);
        }
        Ok(config)
    }

    /// Entry for a specific replica.
    pub fn entry(&self, id: &NodeId) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// All entries except the given replica; the peer set.
    pub fn peers(&self, id: &NodeId) -> Vec<NodeEntry> {
        self.nodes.iter().filter(|n| &n.id != id).cloned().collect()
    }

    /// Identifiers of every replica in the membership set.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Total replica count n.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The primary of the given view: the minimum identifier in the replica
    /// set. The view is fixed at 0 in this protocol version but the primary
    /// is still computed, never assumed.
    pub fn primary(&self, _view: u64) -> Option<&NodeId> {
        self.nodes.iter().map(|n| &n.id).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_nodes() -> NetworkConfig {
        NetworkConfig {
            nodes: (1..=4)
                .map(|i| NodeEntry {
                    id: NodeId(format!("node{i}")),
                    address: "127.0.0.1".to_string(),
                    port: 8080 + i,
                })
                .collect(),
        }
    }

    #[test]
    fn primary_is_minimum_id() {
        let config = four_nodes();
        assert_eq!(config.primary(0), Some(&NodeId::from("node1")));
    }

    #[test]
    fn primary_ignores_listing_order() {
        let mut config = four_nodes();
        config.nodes.reverse();
        assert_eq!(config.primary(0), Some(&NodeId::from("node1")));
    }

    #[test]
    fn peers_exclude_self() {
        let config = four_nodes();
        let peers = config.peers(&NodeId::from("node2"));
        assert_eq!(peers.len(), 3);
        assert!(peers.iter().all(|p| p.id != NodeId::from("node2")));
    }

    #[test]
    fn parse_from_json() {
        let raw = r#"{"nodes":[{"id":"node1","address":"10.0.0.1","port":9000}]}"#;
        let config: NetworkConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config.nodes[0].base_url(), "http://10.0.0.1:9000");
    }
}
