//! Label counts and precision / recall / F1.

use reaper_core::{FeedbackStats, Metrics};

use crate::record::{FeedbackRecord, OutcomeLabel};

/// Running label counts; the derived, rebuildable cache of the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl LabelCounts {
    pub fn from_records(records: &[FeedbackRecord]) -> Self {
        let mut counts = Self::default();
        for r in records {
            counts.add(r.label);
        }
        counts
    }

    pub fn add(&mut self, label: OutcomeLabel) {
        match label {
            OutcomeLabel::TruePositive => self.true_positives += 1,
            OutcomeLabel::FalsePositive => self.false_positives += 1,
            OutcomeLabel::FalseNegative => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.false_negatives
    }

    /// Metrics are defined only once the total strictly exceeds `min_samples`.
    pub fn is_sufficient(&self, min_samples: usize) -> bool {
        self.total() > min_samples
    }

    pub fn metrics(&self) -> Metrics {
        metrics_from(self.true_positives, self.false_positives, self.false_negatives)
    }

    pub fn to_stats(&self, min_samples: usize) -> FeedbackStats {
        FeedbackStats {
            sample_count: self.total(),
            true_positives: self.true_positives,
            false_positives: self.false_positives,
            false_negatives: self.false_negatives,
            min_samples,
            metrics: self.is_sufficient(min_samples).then(|| self.metrics()),
        }
    }
}

/// Zero denominators yield 0.0 rather than NaN.
pub fn metrics_from(tp: usize, fp: usize, fn_: usize) -> Metrics {
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    Metrics {
        precision,
        recall,
        f1,
    }
}
