//! Fault-injection behavior for Byzantine testing.

use serde::{Deserialize, Serialize};

/// How a replica participates in consensus.
///
/// Honest replicas follow the protocol. Malicious replicas drop or withhold
/// protocol steps with the configured probability. Crashed replicas process
/// nothing. Behavior is switched at runtime through the testing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum Behavior {
    Honest,
    Malicious {
        /// Probability in [0, 1] of deviating at each protocol step.
        #[serde(rename = "malicious_rate")]
        rate: f64,
    },
    Crash,
}

impl Behavior {
    pub fn name(&self) -> &'static str {
        match self {
            Behavior::Honest => "honest",
            Behavior::Malicious { .. } => "malicious",
            Behavior::Crash => "crash",
        }
    }

    pub fn malicious_rate(&self) -> f64 {
        match self {
            Behavior::Malicious { rate } => *rate,
            _ => 0.0,
        }
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior::Honest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_tagged_form() {
        let b: Behavior =
            serde_json::from_str(r#"{"behavior":"malicious","malicious_rate":0.5}"#).unwrap();
        assert_eq!(b, Behavior::Malicious { rate: 0.5 });
        assert_eq!(b.name(), "malicious");
        assert_eq!(b.malicious_rate(), 0.5);

        let h: Behavior = serde_json::from_str(r#"{"behavior":"honest"}"#).unwrap();
        assert_eq!(h, Behavior::Honest);
        assert_eq!(h.malicious_rate(), 0.0);
    }
}
