// user-agent/src/threat_classifier.rs
// Entropy-based write classification

use anyhow::Result;
use std::collections::HashSet;
use std::fmt;

use crate::config::DetectionConfig;

/// Shannon entropy of `sample` in bits per byte, within `[0.0, 8.0]`.
///
/// Depends only on the byte-value histogram, so any permutation of the
/// sample scores the same. An empty sample scores `0.0`.
pub fn shannon_entropy(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }

    let mut counts = [0usize; 256];
    for &byte in sample {
        counts[byte as usize] += 1;
    }

    let total = sample.len() as f64;
    let mut entropy = 0.0;
    for &count in counts.iter().filter(|&&count| count > 0) {
        let p = count as f64 / total;
        entropy -= p * p.log2();
    }
    entropy
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Benign { entropy: f64 },
    Suspicious { entropy: f64 },
}

impl Verdict {
    pub fn entropy(&self) -> f64 {
        match *self {
            Verdict::Benign { entropy } | Verdict::Suspicious { entropy } => entropy,
        }
    }

    pub fn is_suspicious(&self) -> bool {
        matches!(self, Verdict::Suspicious { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Benign { entropy } => write!(f, "benign (entropy {:.2})", entropy),
            Verdict::Suspicious { entropy } => write!(f, "suspicious (entropy {:.2})", entropy),
        }
    }
}

/// Threshold plus allow-list policy. Pure: no I/O, no interior state.
#[derive(Debug, Clone)]
pub struct ThreatClassifier {
    threshold: f64,
    allow_list: HashSet<String>,
}

impl ThreatClassifier {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let threshold = config.entropy_threshold;
        if !threshold.is_finite() || !(0.0..=8.0).contains(&threshold) {
            anyhow::bail!("entropy threshold must be within [0, 8], got {}", threshold);
        }

        Ok(Self {
            threshold,
            allow_list: config.allow_list.iter().cloned().collect(),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_allow_listed(&self, process_name: &str) -> bool {
        self.allow_list.contains(process_name)
    }

    pub fn classify(&self, sample: &[u8], process_name: &str) -> Verdict {
        let entropy = shannon_entropy(sample);

        if entropy > self.threshold && !self.is_allow_listed(process_name) {
            Verdict::Suspicious { entropy }
        } else {
            Verdict::Benign { entropy }
        }
    }
}
