//! Threshold search objectives and the deterministic grid search.

use crate::record::FeedbackRecord;
use crate::stats::metrics_from;

/// Confusion matrix of the labeled records at one candidate threshold.
///
/// TP and FN labels are actual positives, FP labels actual negatives; a
/// record is predicted positive when its score is at or above the candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
}

impl Confusion {
    pub fn at(records: &[FeedbackRecord], threshold: f64) -> Self {
        let mut c = Confusion::default();
        for r in records {
            let predicted = r.score >= threshold;
            match (r.label.is_actual_positive(), predicted) {
                (true, true) => c.true_positives += 1,
                (true, false) => c.false_negatives += 1,
                (false, true) => c.false_positives += 1,
                (false, false) => c.true_negatives += 1,
            }
        }
        c
    }
}

/// What the threshold search maximises.
pub trait ThresholdObjective: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, confusion: &Confusion) -> f64;
}

/// Maximise F1. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct F1Objective;

impl ThresholdObjective for F1Objective {
    fn name(&self) -> &'static str {
        "f1"
    }

    fn evaluate(&self, c: &Confusion) -> f64 {
        metrics_from(c.true_positives, c.false_positives, c.false_negatives).f1
    }
}

/// Minimise weighted misclassification cost.
#[derive(Debug, Clone, Copy)]
pub struct CostWeightedObjective {
    pub false_positive_cost: f64,
    pub false_negative_cost: f64,
}

impl ThresholdObjective for CostWeightedObjective {
    fn name(&self) -> &'static str {
        "cost_weighted"
    }

    fn evaluate(&self, c: &Confusion) -> f64 {
        -(self.false_positive_cost * c.false_positives as f64
            + self.false_negative_cost * c.false_negatives as f64)
    }
}

/// Winner of a grid search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdChoice {
    pub threshold: f64,
    pub objective: f64,
}

/// Try `i / buckets` for `i in 0..=buckets` and keep the best.
///
/// Ties resolve to the lowest candidate, so the same records always give
/// the same answer. `None` for an empty record set, zero buckets, or when
/// every candidate scores the same: such records carry no information
/// about where the threshold belongs (F1 over records with no actual
/// positives is the common case).
pub fn search_threshold(
    records: &[FeedbackRecord],
    buckets: usize,
    objective: &dyn ThresholdObjective,
) -> Option<ThresholdChoice> {
    if records.is_empty() || buckets == 0 {
        return None;
    }
    let mut best: Option<ThresholdChoice> = None;
    let mut worst = f64::INFINITY;
    for i in 0..=buckets {
        let threshold = i as f64 / buckets as f64;
        let value = objective.evaluate(&Confusion::at(records, threshold));
        worst = worst.min(value);
        if best.map_or(true, |b| value > b.objective) {
            best = Some(ThresholdChoice {
                threshold,
                objective: value,
            });
        }
    }
    best.filter(|b| b.objective > worst)
}
