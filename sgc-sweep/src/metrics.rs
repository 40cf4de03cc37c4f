//! Binary classification metrics
//!
//! Computed on a fold's held-out examples with the contrast's class1 as the
//! positive label. Undefined ratios (zero denominators) are reported as 0.0.

use serde::{Deserialize, Serialize};

/// Confusion counts relative to one positive label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionCounts {
    /// Count outcomes; any label other than `positive` counts as negative
    pub fn from_labels<T: AsRef<str>, P: AsRef<str>>(
        truth: &[T],
        predicted: &[P],
        positive: &str,
    ) -> Self {
        let mut counts = Self::default();
        for (t, p) in truth.iter().zip(predicted) {
            match (t.as_ref() == positive, p.as_ref() == positive) {
                (true, true) => counts.tp += 1,
                (false, false) => counts.tn += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_ += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Scores of one fold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Held-out examples of the positive class
    pub support_pos: usize,
    /// Held-out examples of the negative class
    pub support_neg: usize,
}

impl BinaryMetrics {
    pub fn from_counts(counts: ConfusionCounts) -> Self {
        let precision = ratio(counts.tp, counts.tp + counts.fp);
        let recall = ratio(counts.tp, counts.tp + counts.fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Self {
            accuracy: ratio(counts.tp + counts.tn, counts.total()),
            precision,
            recall,
            f1,
            support_pos: counts.tp + counts.fn_,
            support_neg: counts.tn + counts.fp,
        }
    }

    pub fn compute<T: AsRef<str>, P: AsRef<str>>(
        truth: &[T],
        predicted: &[P],
        positive: &str,
    ) -> Self {
        Self::from_counts(ConfusionCounts::from_labels(truth, predicted, positive))
    }
}
