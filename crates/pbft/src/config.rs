//! Engine configuration.

use std::time::Duration;

/// Tunables for the consensus engine.
#[derive(Debug, Clone)]
pub struct PbftConfig {
    /// Interval of the periodic proposal trigger on the primary.
    pub proposal_interval: Duration,

    /// Coalescing delay between a ballot admission and the proposal it
    /// triggers, so rapid submissions batch into one block.
    pub batch_delay: Duration,

    /// Upper bound on ballots drained into a single block.
    pub max_ballots_per_block: usize,
}

impl PbftConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proposal_interval(mut self, interval: Duration) -> Self {
        self.proposal_interval = interval;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_max_ballots(mut self, max: usize) -> Self {
        self.max_ballots_per_block = max;
        self
    }
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self {
            proposal_interval: Duration::from_secs(30),
            batch_delay: Duration::from_secs(1),
            max_ballots_per_block: 512,
        }
    }
}
