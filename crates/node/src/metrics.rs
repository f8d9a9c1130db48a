//! Replica metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters; traces
//! carry event-level granularity.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for replica monitoring.
pub struct Metrics {
    // === Consensus ===
    pub blocks_committed: Counter,
    pub chain_height: Gauge,

    // === Ballots ===
    pub ballots_admitted: Counter,
    pub ballots_rejected: Counter,
    pub mempool_size: Gauge,

    // === Network ===
    pub messages_sent: Counter,
    pub messages_received: Counter,
    pub messages_dropped: Counter,
    pub forwarded_votes: Counter,
}

impl Metrics {
    fn new() -> Self {
        Self {
            blocks_committed: register_counter!(
                "urna_blocks_committed_total",
                "Total number of blocks committed"
            )
            .unwrap(),

            chain_height: register_gauge!("urna_chain_height", "Current chain height").unwrap(),

            ballots_admitted: register_counter!(
                "urna_ballots_admitted_total",
                "Ballots admitted to the mempool"
            )
            .unwrap(),

            ballots_rejected: register_counter!(
                "urna_ballots_rejected_total",
                "Ballots rejected at admission"
            )
            .unwrap(),

            mempool_size: register_gauge!(
                "urna_mempool_size",
                "Number of pending ballots in the mempool"
            )
            .unwrap(),

            messages_sent: register_counter!(
                "urna_messages_sent_total",
                "Consensus messages broadcast to peers"
            )
            .unwrap(),

            messages_received: register_counter!(
                "urna_messages_received_total",
                "Consensus messages received from peers"
            )
            .unwrap(),

            messages_dropped: register_counter!(
                "urna_messages_dropped_total",
                "Outbound messages dropped on a full peer queue"
            )
            .unwrap(),

            forwarded_votes: register_counter!(
                "urna_forwarded_votes_total",
                "Client votes forwarded to the primary"
            )
            .unwrap(),
        }
    }
}

/// Global metrics handle, registered on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub fn record_block_committed(height: u64) {
    let m = metrics();
    m.blocks_committed.inc();
    m.chain_height.set(height as f64);
}

pub fn record_ballot_admitted(pending: usize) {
    let m = metrics();
    m.ballots_admitted.inc();
    m.mempool_size.set(pending as f64);
}

pub fn record_ballot_rejected() {
    metrics().ballots_rejected.inc();
}

pub fn set_mempool_size(pending: usize) {
    metrics().mempool_size.set(pending as f64);
}

pub fn record_message_sent() {
    metrics().messages_sent.inc();
}

pub fn record_message_received() {
    metrics().messages_received.inc();
}

pub fn record_message_dropped() {
    metrics().messages_dropped.inc();
}

pub fn record_vote_forwarded() {
    metrics().forwarded_votes.inc();
}
