//! Logistic regression on standardized features
//!
//! Features are standardized with aprender's `StandardScaler`; the fitted
//! means and standard deviations are kept on the model so inference needs no
//! scaler. Weights come from full-batch gradient descent on the mean log-loss
//! with an L2 penalty.

use super::{check_training_set, sigmoid, threshold, Classifier, ModelError, Result};
use aprender::preprocessing::StandardScaler;
use aprender::primitives::Matrix;
use aprender::traits::Transformer;
use serde::{Deserialize, Serialize};

/// Standard deviations below this are treated as constant columns
const MIN_STD: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub iterations: usize,
    pub learning_rate: f64,
    /// L2 penalty on weights (not on the intercept)
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            iterations: 200,
            learning_rate: 0.1,
            l2: 1e-4,
        }
    }
}

impl LogisticParams {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "iterations must be > 0".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidHyperparameter(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(ModelError::InvalidHyperparameter(format!(
                "l2 must be >= 0, got {}",
                self.l2
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    means: Vec<f64>,
    stds: Vec<f64>,
    weights: Vec<f64>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn fit(params: &LogisticParams, x: &[Vec<f64>], y: &[u8]) -> Result<Self> {
        params.validate()?;
        let n_features = check_training_set(x, y)?;
        let (means, stds) = fit_scaler(x, n_features)?;

        let standardized: Vec<Vec<f64>> = x
            .iter()
            .map(|row| standardize(row, &means, &stds))
            .collect();

        let n = x.len() as f64;
        let mut weights = vec![0.0; n_features];
        let mut intercept = 0.0;
        let mut grad = vec![0.0; n_features];

        for _ in 0..params.iterations {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_intercept = 0.0;

            for (row, &label) in standardized.iter().zip(y) {
                let err = sigmoid(intercept + dot(&weights, row)) - f64::from(label);
                for (g, &v) in grad.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_intercept += err;
            }

            for (w, g) in weights.iter_mut().zip(&grad) {
                *w -= params.learning_rate * (g / n + params.l2 * *w);
            }
            intercept -= params.learning_rate * grad_intercept / n;
        }

        Ok(Self {
            params: params.clone(),
            means,
            stds,
            weights,
            intercept,
        })
    }

    /// Coefficients on the standardized scale
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl LogisticRegression {
    /// Positive-class probability per row
    pub fn probabilities(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let z = standardize(row, &self.means, &self.stds);
                sigmoid(self.intercept + dot(&self.weights, &z))
            })
            .collect()
    }
}

impl Classifier for LogisticRegression {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Option<Vec<f64>> {
        Some(self.probabilities(x))
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        threshold(&self.probabilities(x))
    }
}

/// Column means and standard deviations via aprender's `StandardScaler`
fn fit_scaler(x: &[Vec<f64>], n_features: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let data: Vec<f32> = x.iter().flatten().map(|&v| v as f32).collect();
    let matrix = Matrix::from_vec(x.len(), n_features, data)
        .map_err(|e| ModelError::Preprocessing(e.to_string()))?;

    let mut scaler = StandardScaler::new().with_mean(true).with_std(true);
    scaler
        .fit(&matrix)
        .map_err(|e| ModelError::Preprocessing(e.to_string()))?;

    let means = scaler.mean().to_vec().into_iter().map(f64::from).collect();
    let stds = scaler
        .std()
        .to_vec()
        .into_iter()
        .map(|s| {
            let s = f64::from(s);
            if s.is_finite() && s > MIN_STD {
                s
            } else {
                1.0
            }
        })
        .collect();
    Ok((means, stds))
}

fn standardize(row: &[f64], means: &[f64], stds: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means.iter().zip(stds))
        .map(|(&v, (&m, &s))| (v - m) / s)
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
