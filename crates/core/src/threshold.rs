//! Read interface for the action threshold plus the statistics reported
//! alongside threshold changes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Anything that can tell the action stage which score is high enough to act on.
///
/// Implemented by the feedback loop (adaptive) and by [`StaticThreshold`].
/// Reads must be cheap and must not block on threshold recalculation.
pub trait ThresholdSource: Send + Sync {
    fn current_threshold(&self) -> f64;
}

/// A fixed threshold that can still be replaced at runtime.
#[derive(Debug)]
pub struct StaticThreshold {
    bits: AtomicU64,
}

impl StaticThreshold {
    pub fn new(threshold: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            bits: AtomicU64::new(check_threshold(threshold)?.to_bits()),
        })
    }

    pub fn set(&self, threshold: f64) -> Result<(), ValidationError> {
        self.bits
            .store(check_threshold(threshold)?.to_bits(), Ordering::Release);
        Ok(())
    }
}

impl ThresholdSource for StaticThreshold {
    fn current_threshold(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

fn check_threshold(threshold: f64) -> Result<f64, ValidationError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ValidationError::InvalidConfig(format!(
            "threshold {threshold} is outside [0.0, 1.0]"
        )))
    }
}

/// Precision / recall / F1 computed from labeled outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Aggregate view of the feedback log.
///
/// `metrics` is `None` while the sample count has not yet exceeded the
/// configured minimum ("insufficient data").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub sample_count: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub min_samples: usize,
    pub metrics: Option<Metrics>,
}

impl FeedbackStats {
    pub fn is_sufficient(&self) -> bool {
        self.metrics.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_threshold_reads_and_updates() {
        let t = StaticThreshold::new(0.5).unwrap();
        assert_eq!(t.current_threshold(), 0.5);
        t.set(0.75).unwrap();
        assert_eq!(t.current_threshold(), 0.75);
    }

    #[test]
    fn static_threshold_rejects_out_of_range() {
        assert!(StaticThreshold::new(1.5).is_err());
        assert!(StaticThreshold::new(f64::NAN).is_err());
        let t = StaticThreshold::new(0.2).unwrap();
        assert!(t.set(-0.1).is_err());
        assert_eq!(t.current_threshold(), 0.2);
    }
}
