//! Frequency-energy level sampling.

use crate::provider::{AnalysisNode, AudioAnalysisProvider};

/// Largest value a frequency bin can hold.
const MAX_BIN: f64 = 255.0;

/// Mean of the byte bins scaled to 0..1. Empty input is silence.
pub fn normalized_average(bins: &[u8]) -> f64 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&b| u64::from(b)).sum();
    (sum as f64 / bins.len() as f64) / MAX_BIN
}

/// Strict comparison: a level exactly at the threshold is not activity.
pub fn exceeds(level: f64, threshold: f64) -> bool {
    level > threshold
}

/// Read `node` once and return its normalized average level.
pub fn sample(analysis: &dyn AudioAnalysisProvider, node: AnalysisNode) -> f64 {
    normalized_average(&analysis.read_frequency_data(node))
}

/// Whether `node`'s current level is above `threshold`.
pub fn check_level(threshold: f64, analysis: &dyn AudioAnalysisProvider, node: AnalysisNode) -> bool {
    exceeds(sample(analysis, node), threshold)
}
