//! Random forest of Gini CART trees
//!
//! Each tree is grown on a bootstrap sample of the training rows and samples
//! `max_features` candidate features per split (default `ceil(sqrt(d))`). The
//! forest probability is the mean of the per-tree leaf class fractions.
//!
//! Every tree gets its own seed, drawn up front from the model seed, so the
//! fitted forest is identical under the local and the parallel compute
//! context regardless of thread count.
//!
//! # References
//!
//! Breiman, L. (2001). Random forests. Machine Learning, 45(1), 5-32.

use super::tree::{Criterion, DecisionTree, Stats, TreeParams};
use super::{check_training_set, threshold, Classifier, ComputeContext, ModelError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_split: usize,
    /// Candidate features per split (`None` = square root of feature count)
    pub max_features: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            num_trees: 50,
            max_depth: 10,
            min_split: 10,
            max_features: None,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.num_trees == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "num_trees must be > 0".to_string(),
            ));
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
        if self.max_features == Some(0) {
            return Err(ModelError::InvalidHyperparameter(
                "max_features must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(
        params: &ForestParams,
        x: &[Vec<f64>],
        y: &[u8],
        seed: u64,
        compute: ComputeContext,
    ) -> Result<Self> {
        params.validate()?;
        let n_features = check_training_set(x, y)?;

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            max_leaves: usize::MAX,
            min_split: params.min_split,
            max_features: Some(
                params
                    .max_features
                    .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
                    .max(1),
            ),
        };
        let targets: Vec<Stats> = y.iter().map(|&v| Stats::new(1.0, f64::from(v))).collect();

        let mut seeder = StdRng::seed_from_u64(seed);
        let seeds: Vec<u64> = (0..params.num_trees).map(|_| seeder.gen()).collect();

        let trees = match compute {
            ComputeContext::Local => build_trees(x, &targets, &seeds, &tree_params),
            ComputeContext::Parallel { threads } => {
                build_trees_parallel(x, &targets, &seeds, &tree_params, threads)?
            }
        };

        Ok(Self {
            params: params.clone(),
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl RandomForest {
    /// Mean of per-tree leaf class frequencies
    pub fn probabilities(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let n_trees = self.trees.len() as f64;
        x.iter()
            .map(|row| self.trees.iter().map(|t| t.predict_one(row)).sum::<f64>() / n_trees)
            .collect()
    }
}

impl Classifier for RandomForest {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Option<Vec<f64>> {
        Some(self.probabilities(x))
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        threshold(&self.probabilities(x))
    }
}

fn build_tree(x: &[Vec<f64>], targets: &[Stats], seed: u64, params: &TreeParams) -> DecisionTree {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = x.len();
    let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
    DecisionTree::fit(x, targets, &bootstrap, params, Criterion::Gini, &mut rng)
}

fn build_trees(
    x: &[Vec<f64>],
    targets: &[Stats],
    seeds: &[u64],
    params: &TreeParams,
) -> Vec<DecisionTree> {
    seeds
        .iter()
        .map(|&seed| build_tree(x, targets, seed, params))
        .collect()
}

/// Build trees on scoped worker threads, keeping seed order
fn build_trees_parallel(
    x: &[Vec<f64>],
    targets: &[Stats],
    seeds: &[u64],
    params: &TreeParams,
    threads: usize,
) -> Result<Vec<DecisionTree>> {
    if threads == 0 {
        return Err(ModelError::ComputeContext(
            "parallel context needs at least one thread".to_string(),
        ));
    }
    let chunk_size = seeds.len().div_ceil(threads).max(1);

    let per_chunk = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = seeds
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move |_| build_trees(x, targets, chunk, params)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| ModelError::ComputeContext("forest worker scope panicked".to_string()))?;

    let mut trees = Vec::with_capacity(seeds.len());
    for chunk in per_chunk {
        trees.extend(
            chunk.map_err(|_| ModelError::ComputeContext("forest worker panicked".to_string()))?,
        );
    }
    tracing::debug!(
        "Built {} forest trees on {} worker threads",
        trees.len(),
        threads
    );
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band_data() -> (Vec<Vec<f64>>, Vec<u8>) {
        // Positive inside the band 30 <= a < 70, b is noise
        let x: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![(i % 100) as f64, ((i * 37) % 11) as f64])
            .collect();
        let y: Vec<u8> = x
            .iter()
            .map(|r| u8::from(r[0] >= 30.0 && r[0] < 70.0))
            .collect();
        (x, y)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            num_trees: 15,
            max_depth: 6,
            min_split: 4,
            max_features: None,
        }
    }

    #[test]
    fn test_forest_learns_band() {
        let (x, y) = band_data();
        let forest = RandomForest::fit(&small_params(), &x, &y, 42, ComputeContext::Local).unwrap();

        assert_eq!(forest.n_trees(), 15);
        let proba = forest.predict_proba(&[vec![50.0, 3.0], vec![5.0, 3.0]]).unwrap();
        assert!(proba[0] > 0.7, "inside band: {}", proba[0]);
        assert!(proba[1] < 0.3, "outside band: {}", proba[1]);
    }

    #[test]
    fn test_forest_is_deterministic_per_seed() {
        let (x, y) = band_data();
        let a = RandomForest::fit(&small_params(), &x, &y, 7, ComputeContext::Local).unwrap();
        let b = RandomForest::fit(&small_params(), &x, &y, 7, ComputeContext::Local).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parallel_matches_local() {
        let (x, y) = band_data();
        let local = RandomForest::fit(&small_params(), &x, &y, 11, ComputeContext::Local).unwrap();
        for threads in [1, 3, 8, 32] {
            let parallel =
                RandomForest::fit(&small_params(), &x, &y, 11, ComputeContext::Parallel { threads })
                    .unwrap();
            assert_eq!(local, parallel, "threads = {}", threads);
        }
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let (x, y) = band_data();
        let forest = RandomForest::fit(&small_params(), &x, &y, 5, ComputeContext::Local).unwrap();
        let proba = forest.predict_proba(&x).unwrap();

        assert_eq!(proba.len(), x.len());
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_invalid_params() {
        let params = ForestParams {
            num_trees: 0,
            ..ForestParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ModelError::InvalidHyperparameter(_))
        ));
        let params = ForestParams {
            min_split: 1,
            ..ForestParams::default()
        };
        assert!(params.validate().is_err());
    }
}
