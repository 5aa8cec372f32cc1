//! Binary classifiers for credit default prediction
//!
//! - [`logistic::LogisticRegression`]: standardized features, gradient descent
//! - [`forest::RandomForest`]: bagged CART trees with Gini splits
//! - [`boosting::BoostedTrees`]: gradient-boosted regression trees on log-loss
//! - [`ensemble::MajorityVote`]: hard-vote combination of fitted models
//!
//! Every learner draws its randomness from a `StdRng` seeded by the caller, so
//! a fit is fully determined by data, hyperparameters and seed.

pub mod boosting;
pub mod ensemble;
pub mod forest;
pub mod logistic;
pub mod tree;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use boosting::{BoostedTrees, BoostingParams};
pub use ensemble::MajorityVote;
pub use forest::{ForestParams, RandomForest};
pub use logistic::{LogisticParams, LogisticRegression};

/// Errors for model training
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Feature matrix has {rows} rows but {labels} labels")]
    LabelMismatch { rows: usize, labels: usize },

    #[error("Expected {expected} features, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("Compute context unavailable: {0}")]
    ComputeContext(String),

    #[error("Ensemble needs at least one member")]
    EmptyEnsemble,
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Inference interface shared by every fitted model
pub trait Classifier {
    /// Positive-class probability per row, or `None` for hard-vote models
    fn predict_proba(&self, x: &[Vec<f64>]) -> Option<Vec<f64>>;

    /// Class label (0/1) per row, one per input row
    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8>;
}

/// Label at the 0.5 probability cut-off
pub fn threshold(probabilities: &[f64]) -> Vec<u8> {
    probabilities.iter().map(|&p| u8::from(p >= 0.5)).collect()
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Shared shape checks for every `fit`
pub(crate) fn check_training_set(x: &[Vec<f64>], y: &[u8]) -> Result<usize> {
    if x.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.len() != y.len() {
        return Err(ModelError::LabelMismatch {
            rows: x.len(),
            labels: y.len(),
        });
    }
    let n_features = x[0].len();
    if let Some(row) = x.iter().find(|row| row.len() != n_features) {
        return Err(ModelError::DimensionMismatch {
            expected: n_features,
            found: row.len(),
        });
    }
    Ok(n_features)
}

/// Where tree building runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeContext {
    /// Single thread, in the caller
    #[default]
    Local,
    /// Scoped worker threads
    Parallel { threads: usize },
}

impl ComputeContext {
    pub fn validate(&self) -> Result<()> {
        match self {
            ComputeContext::Parallel { threads: 0 } => Err(ModelError::ComputeContext(
                "parallel context needs at least one thread".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Algorithm family plus hyperparameters for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelParams {
    LogisticRegression(LogisticParams),
    RandomForest(ForestParams),
    BoostedTrees(BoostingParams),
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelParams::LogisticRegression(p) => p.validate(),
            ModelParams::RandomForest(p) => p.validate(),
            ModelParams::BoostedTrees(p) => p.validate(),
        }
    }

    /// Hyperparameters as strings, for logs and model metadata
    pub fn describe(&self) -> Vec<(String, String)> {
        let pairs: Vec<(&str, String)> = match self {
            ModelParams::LogisticRegression(p) => vec![
                ("family", "logistic_regression".to_string()),
                ("iterations", p.iterations.to_string()),
                ("learning_rate", p.learning_rate.to_string()),
                ("l2", p.l2.to_string()),
            ],
            ModelParams::RandomForest(p) => vec![
                ("family", "random_forest".to_string()),
                ("num_trees", p.num_trees.to_string()),
                ("max_depth", p.max_depth.to_string()),
                ("min_split", p.min_split.to_string()),
                (
                    "max_features",
                    p.max_features
                        .map_or_else(|| "sqrt".to_string(), |m| m.to_string()),
                ),
            ],
            ModelParams::BoostedTrees(p) => vec![
                ("family", "boosted_trees".to_string()),
                ("num_trees", p.num_trees.to_string()),
                ("learning_rate", p.learning_rate.to_string()),
                ("num_leaves", p.num_leaves.to_string()),
                ("max_depth", p.max_depth.to_string()),
                ("min_split", p.min_split.to_string()),
                ("unbalanced", p.unbalanced.to_string()),
            ],
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// Any fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    BoostedTrees(BoostedTrees),
    MajorityVote(MajorityVote),
}

impl TrainedModel {
    /// Fit the learner described by `params`
    pub fn fit(
        params: &ModelParams,
        x: &[Vec<f64>],
        y: &[u8],
        seed: u64,
        compute: ComputeContext,
    ) -> Result<Self> {
        params.validate()?;
        compute.validate()?;

        Ok(match params {
            ModelParams::LogisticRegression(p) => {
                TrainedModel::LogisticRegression(LogisticRegression::fit(p, x, y)?)
            }
            ModelParams::RandomForest(p) => {
                TrainedModel::RandomForest(RandomForest::fit(p, x, y, seed, compute)?)
            }
            ModelParams::BoostedTrees(p) => {
                TrainedModel::BoostedTrees(BoostedTrees::fit(p, x, y, seed)?)
            }
        })
    }

    pub fn family(&self) -> &'static str {
        match self {
            TrainedModel::LogisticRegression(_) => "logistic_regression",
            TrainedModel::RandomForest(_) => "random_forest",
            TrainedModel::BoostedTrees(_) => "boosted_trees",
            TrainedModel::MajorityVote(_) => "majority_vote",
        }
    }
}

impl Classifier for TrainedModel {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Option<Vec<f64>> {
        match self {
            TrainedModel::LogisticRegression(m) => m.predict_proba(x),
            TrainedModel::RandomForest(m) => m.predict_proba(x),
            TrainedModel::BoostedTrees(m) => m.predict_proba(x),
            TrainedModel::MajorityVote(m) => m.predict_proba(x),
        }
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        match self {
            TrainedModel::LogisticRegression(m) => m.predict(x),
            TrainedModel::RandomForest(m) => m.predict(x),
            TrainedModel::BoostedTrees(m) => m.predict(x),
            TrainedModel::MajorityVote(m) => m.predict(x),
        }
    }
}
