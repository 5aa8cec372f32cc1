//! Gradient-boosted regression trees for binary classification
//!
//! Minimizes binomial deviance. The initial raw score is the log-odds of the
//! (weighted) positive rate; each round fits a leaf-limited regression tree to
//! the per-row gradient and hessian of the loss and adds its Newton leaf
//! values, shrunk by the learning rate.
//!
//! With `unbalanced` set, each class is weighted by `n / (2 · n_class)` so the
//! minority class carries as much total weight as the majority class.
//!
//! # References
//!
//! Friedman, J. H. (2001). Greedy function approximation: a gradient boosting
//! machine. Annals of Statistics, 29(5), 1189-1232.

use super::tree::{Criterion, DecisionTree, Stats, TreeParams};
use super::{check_training_set, sigmoid, threshold, Classifier, ModelError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Floor on the hessian so near-certain rows keep a usable denominator
const MIN_HESSIAN: f64 = 1e-12;

/// Clamp for the initial positive rate
const RATE_EPS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub num_trees: usize,
    pub learning_rate: f64,
    /// Leaf budget per tree
    pub num_leaves: usize,
    pub max_depth: usize,
    pub min_split: usize,
    /// Reweight classes to equal total weight
    pub unbalanced: bool,
    /// L2 regularization on leaf values
    pub lambda: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            num_trees: 100,
            learning_rate: 0.1,
            num_leaves: 20,
            max_depth: 8,
            min_split: 10,
            unbalanced: false,
            lambda: 1.0,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> Result<()> {
        if self.num_trees == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "num_trees must be > 0".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidHyperparameter(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        if self.num_leaves < 2 {
            return Err(ModelError::InvalidHyperparameter(format!(
                "num_leaves must be >= 2, got {}",
                self.num_leaves
            )));
        }
        if self.max_depth == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "max_depth must be > 0".to_string(),
            ));
        }
        if self.min_split < 2 {
            return Err(ModelError::InvalidHyperparameter(format!(
                "min_split must be >= 2, got {}",
                self.min_split
            )));
        }
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(ModelError::InvalidHyperparameter(format!(
                "lambda must be >= 0, got {}",
                self.lambda
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    params: BoostingParams,
    base_score: f64,
    trees: Vec<DecisionTree>,
}

impl BoostedTrees {
    pub fn fit(params: &BoostingParams, x: &[Vec<f64>], y: &[u8], seed: u64) -> Result<Self> {
        params.validate()?;
        check_training_set(x, y)?;

        let weights = class_weights(y, params.unbalanced);
        let total_weight: f64 = weights.iter().sum();
        let positive_weight: f64 = weights
            .iter()
            .zip(y)
            .filter(|(_, &label)| label == 1)
            .map(|(w, _)| w)
            .sum();
        let rate = (positive_weight / total_weight).clamp(RATE_EPS, 1.0 - RATE_EPS);
        let base_score = (rate / (1.0 - rate)).ln();

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            max_leaves: params.num_leaves,
            min_split: params.min_split,
            max_features: None,
        };
        let criterion = Criterion::Newton {
            lambda: params.lambda,
        };
        let rows: Vec<usize> = (0..x.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut raw = vec![base_score; x.len()];
        let mut trees = Vec::with_capacity(params.num_trees);
        let mut targets = vec![Stats::default(); x.len()];

        for _ in 0..params.num_trees {
            for (i, target) in targets.iter_mut().enumerate() {
                let p = sigmoid(raw[i]);
                let w = weights[i];
                *target = Stats::new(
                    (w * p * (1.0 - p)).max(MIN_HESSIAN),
                    w * (p - f64::from(y[i])),
                );
            }

            let tree = DecisionTree::fit(x, &targets, &rows, &tree_params, criterion, &mut rng);
            for (score, row) in raw.iter_mut().zip(x) {
                *score += params.learning_rate * tree.predict_one(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            params: params.clone(),
            base_score,
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Positive-class probability per row
    pub fn probabilities(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| sigmoid(self.decision_function(row)))
            .collect()
    }

    /// Raw additive score (log-odds) for one row
    pub fn decision_function(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.params.learning_rate
                * self.trees.iter().map(|t| t.predict_one(row)).sum::<f64>()
    }
}

impl Classifier for BoostedTrees {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Option<Vec<f64>> {
        Some(self.probabilities(x))
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        threshold(&self.probabilities(x))
    }
}

/// Per-row weights; balanced weights are `n / (2 · n_class)`
fn class_weights(y: &[u8], unbalanced: bool) -> Vec<f64> {
    if !unbalanced {
        return vec![1.0; y.len()];
    }
    let n = y.len() as f64;
    let positives = y.iter().filter(|&&v| v == 1).count() as f64;
    let negatives = n - positives;
    let weight_for = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 1.0 };
    let (w_pos, w_neg) = (weight_for(positives), weight_for(negatives));
    y.iter()
        .map(|&v| if v == 1 { w_pos } else { w_neg })
        .collect()
}
