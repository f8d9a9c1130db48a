//! PBFT wire messages.
//!
//! The protocol message set is closed; it is modeled as a tagged enum so the
//! dispatcher matches exhaustively. On the wire each message is a JSON object
//! with a `type` tag of `PRE_PREPARE`, `PREPARE`, `COMMIT` or `VIEW_CHANGE`,
//! posted to a peer's `/pbft/message` endpoint.
//!
//! Signatures are carried as an optional field for forward compatibility but
//! are not verified in this protocol version.

use crate::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PbftMessage {
    /// Primary's proposal for a sequence number; carries the full block as a
    /// JSON string so backups can validate and later commit it.
    #[serde(rename = "PRE_PREPARE")]
    PrePrepare {
        view: u64,
        #[serde(rename = "sequence_num")]
        sequence: u64,
        node_id: NodeId,
        block_hash: String,
        /// JSON-serialized block.
        block_data: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A replica's endorsement of the proposed block hash.
    #[serde(rename = "PREPARE")]
    Prepare {
        view: u64,
        #[serde(rename = "sequence_num")]
        sequence: u64,
        node_id: NodeId,
        block_hash: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A replica's commitment to the prepared block hash.
    #[serde(rename = "COMMIT")]
    Commit {
        view: u64,
        #[serde(rename = "sequence_num")]
        sequence: u64,
        node_id: NodeId,
        block_hash: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Parsed for wire compatibility; the protocol runs under a fixed view,
    /// so receivers discard these.
    #[serde(rename = "VIEW_CHANGE")]
    ViewChange {
        view: u64,
        #[serde(rename = "sequence_num")]
        sequence: u64,
        node_id: NodeId,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl PbftMessage {
    /// View the message was sent in.
    pub fn view(&self) -> u64 {
        match self {
            PbftMessage::PrePrepare { view, .. }
            | PbftMessage::Prepare { view, .. }
            | PbftMessage::Commit { view, .. }
            | PbftMessage::ViewChange { view, .. } => *view,
        }
    }

    /// Sequence number the message refers to.
    pub fn sequence(&self) -> u64 {
        match self {
            PbftMessage::PrePrepare { sequence, .. }
            | PbftMessage::Prepare { sequence, .. }
            | PbftMessage::Commit { sequence, .. }
            | PbftMessage::ViewChange { sequence, .. } => *sequence,
        }
    }

    /// Identifier of the sending replica.
    pub fn sender(&self) -> &NodeId {
        match self {
            PbftMessage::PrePrepare { node_id, .. }
            | PbftMessage::Prepare { node_id, .. }
            | PbftMessage::Commit { node_id, .. }
            | PbftMessage::ViewChange { node_id, .. } => node_id,
        }
    }

    /// Block hash the message votes on, if any.
    pub fn block_hash(&self) -> Option<&str> {
        match self {
            PbftMessage::PrePrepare { block_hash, .. }
            | PbftMessage::Prepare { block_hash, .. }
            | PbftMessage::Commit { block_hash, .. } => Some(block_hash),
            PbftMessage::ViewChange { .. } => None,
        }
    }

    /// Message type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            PbftMessage::PrePrepare { .. } => "PRE_PREPARE",
            PbftMessage::Prepare { .. } => "PREPARE",
            PbftMessage::Commit { .. } => "COMMIT",
            PbftMessage::ViewChange { .. } => "VIEW_CHANGE",
        }
    }
}
