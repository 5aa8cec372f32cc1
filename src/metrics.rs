//! Binary classification metrics
//!
//! Confusion-matrix metrics use class `1` as the positive class. Precision
//! with no positive predictions and recall with no positive labels are 0.0,
//! so every confusion metric stays in `[0, 1]`. AUC is the Mann-Whitney rank
//! statistic with average ranks for ties; it is NaN when the model has no
//! scores or the labels hold a single class.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Got {found} {what} for {expected} labels")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Counts of predicted vs actual labels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    /// Tally `predicted` against `actual` (compared pairwise)
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let mut cm = ConfusionMatrix::default();
        for (&a, &p) in actual.iter().zip(predicted) {
            match (a == 1, p == 1) {
                (true, true) => cm.true_positives += 1,
                (false, true) => cm.false_positives += 1,
                (false, false) => cm.true_negatives += 1,
                (true, false) => cm.false_negatives += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn recall(&self) -> f64 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve for positive-class `scores`
pub fn roc_auc(actual: &[u8], scores: &[f64]) -> f64 {
    let n = actual.len().min(scores.len());
    let n_pos = actual[..n].iter().filter(|&&a| a == 1).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average 1-based ranks across tied scores
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = (0..n).filter(|&k| actual[k] == 1).map(|k| ranks[k]).sum();
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    u / (n_pos as f64 * n_neg as f64)
}

/// Scalar metrics reported per model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    /// NaN when undefined
    pub auc: f64,
    pub confusion: ConfusionMatrix,
}

/// Score a model's test-set output; every input must have one entry per label
pub fn evaluate(
    actual: &[u8],
    predicted: &[u8],
    scores: Option<&[f64]>,
) -> Result<ClassificationMetrics, MetricsError> {
    let check = |what, found: usize| {
        if found == actual.len() {
            Ok(())
        } else {
            Err(MetricsError::LengthMismatch {
                what,
                expected: actual.len(),
                found,
            })
        }
    };
    check("predictions", predicted.len())?;
    if let Some(scores) = scores {
        check("scores", scores.len())?;
    }

    let confusion = ConfusionMatrix::from_labels(actual, predicted);
    Ok(ClassificationMetrics {
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        auc: scores.map_or(f64::NAN, |s| roc_auc(actual, s)),
        confusion,
    })
}
