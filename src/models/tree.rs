//! CART decision trees shared by the forest and the booster
//!
//! Trees grow best-first: the open leaf whose best split has the largest gain
//! is split next, until no leaf can be split or `max_leaves` is reached. With
//! an unlimited leaf budget this is the same tree depth-first growth builds.
//!
//! Split quality uses one formula for both criteria. Each sample contributes
//! a pair of sums `(weight, value)`, and a node scores `value² / weight`-like
//! terms so that `gain = score(left) + score(right) - score(parent)`:
//!
//! - Gini (classification): `weight = w`, `value = w·y`; the score is the
//!   weighted node size minus its weighted Gini impurity.
//! - Newton (boosting): `weight = hessian`, `value = gradient`; the score is
//!   `G² / (H + λ)`.
//!
//! # References
//!
//! Breiman, L., Friedman, J., Olshen, R., & Stone, C. (1984).
//! Classification and Regression Trees. Wadsworth.

use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub};

/// Minimum gain for a split to be worth making
const MIN_GAIN: f64 = 1e-12;

/// Per-sample sufficient statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub weight: f64,
    pub value: f64,
}

impl Stats {
    pub fn new(weight: f64, value: f64) -> Self {
        Self { weight, value }
    }
}

impl Add for Stats {
    type Output = Stats;
    fn add(self, rhs: Stats) -> Stats {
        Stats::new(self.weight + rhs.weight, self.value + rhs.value)
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, rhs: Stats) {
        *self = *self + rhs;
    }
}

impl Sub for Stats {
    type Output = Stats;
    fn sub(self, rhs: Stats) -> Stats {
        Stats::new(self.weight - rhs.weight, self.value - rhs.value)
    }
}

/// Split criterion and leaf estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Criterion {
    /// Leaves hold the weighted positive-class fraction
    Gini,
    /// Leaves hold the Newton step `-G / (H + lambda)`
    Newton { lambda: f64 },
}

impl Criterion {
    fn score(&self, s: Stats) -> f64 {
        match self {
            Criterion::Gini => {
                if s.weight <= 0.0 {
                    return 0.0;
                }
                let neg = s.weight - s.value;
                (s.value * s.value + neg * neg) / s.weight
            }
            Criterion::Newton { lambda } => s.value * s.value / (s.weight + lambda),
        }
    }

    fn leaf_value(&self, s: Stats) -> f64 {
        match self {
            Criterion::Gini => {
                if s.weight <= 0.0 {
                    0.0
                } else {
                    s.value / s.weight
                }
            }
            Criterion::Newton { lambda } => -s.value / (s.weight + lambda),
        }
    }
}

/// Growth limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub max_leaves: usize,
    /// Nodes with fewer samples are not split
    pub min_split: usize,
    /// Features sampled per split (`None` = all)
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Fitted tree stored as a flat node arena (root at index 0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct OpenLeaf {
    node: usize,
    depth: usize,
    split: Option<SplitCandidate>,
}

impl DecisionTree {
    /// Grow a tree on `rows` of `x` (rows may repeat, e.g. bootstrap samples)
    pub fn fit(
        x: &[Vec<f64>],
        targets: &[Stats],
        rows: &[usize],
        params: &TreeParams,
        criterion: Criterion,
        rng: &mut StdRng,
    ) -> Self {
        let root_stats = sum_stats(targets, rows);
        let mut nodes = vec![Node::Leaf {
            value: criterion.leaf_value(root_stats),
        }];
        let mut open = vec![OpenLeaf {
            node: 0,
            depth: 0,
            split: find_split(x, targets, rows, 0, params, criterion, rng),
        }];
        let mut leaves = 1;

        while leaves < params.max_leaves {
            let best = open
                .iter()
                .enumerate()
                .filter_map(|(i, leaf)| leaf.split.as_ref().map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((best_idx, _)) = best else {
                break;
            };

            let leaf = open.swap_remove(best_idx);
            let Some(split) = leaf.split else {
                break;
            };

            let left_node = nodes.len();
            let right_node = left_node + 1;
            nodes.push(Node::Leaf {
                value: criterion.leaf_value(sum_stats(targets, &split.left)),
            });
            nodes.push(Node::Leaf {
                value: criterion.leaf_value(sum_stats(targets, &split.right)),
            });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_node,
                right: right_node,
            };
            leaves += 1;

            let depth = leaf.depth + 1;
            for (node, child_rows) in [(left_node, split.left), (right_node, split.right)] {
                let child_split =
                    find_split(x, targets, &child_rows, depth, params, criterion, rng);
                open.push(OpenLeaf {
                    node,
                    depth,
                    split: child_split,
                });
            }
        }

        DecisionTree { nodes }
    }

    /// Leaf value reached by `sample`
    pub fn predict_one(&self, sample: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if sample[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { value } => return *value,
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Longest root-to-leaf path (a lone root leaf has depth 0)
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                Node::Leaf { .. } => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

fn sum_stats(targets: &[Stats], rows: &[usize]) -> Stats {
    rows.iter()
        .fold(Stats::default(), |acc, &r| acc + targets[r])
}

/// Best threshold split of `rows`, if any split improves the criterion
fn find_split(
    x: &[Vec<f64>],
    targets: &[Stats],
    rows: &[usize],
    depth: usize,
    params: &TreeParams,
    criterion: Criterion,
    rng: &mut StdRng,
) -> Option<SplitCandidate> {
    if depth >= params.max_depth || rows.len() < params.min_split.max(2) {
        return None;
    }

    let n_features = x[rows[0]].len();
    if n_features == 0 {
        return None;
    }
    let features: Vec<usize> = match params.max_features {
        Some(k) if k < n_features => index::sample(rng, n_features, k.max(1)).into_vec(),
        _ => (0..n_features).collect(),
    };

    let total = sum_stats(targets, rows);
    let parent_score = criterion.score(total);

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = rows.to_vec();
    for &feature in &features {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left = Stats::default();
        for i in 0..order.len() - 1 {
            left += targets[order[i]];
            let current = x[order[i]][feature];
            let next = x[order[i + 1]][feature];
            if next <= current {
                continue;
            }

            let right = total - left;
            let gain = criterion.score(left) + criterion.score(right) - parent_score;
            if gain > MIN_GAIN && best.map_or(true, |(_, _, g)| gain > g) {
                let mid = current + (next - current) / 2.0;
                let threshold = if mid < next { mid } else { current };
                best = Some((feature, threshold, gain));
            }
        }
    }

    let (feature, threshold, gain) = best?;
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&r| x[r][feature] <= threshold);
    if left.is_empty() || right.is_empty() {
        return None;
    }

    Some(SplitCandidate {
        feature,
        threshold,
        gain,
        left,
        right,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn unlimited() -> TreeParams {
        TreeParams {
            max_depth: 16,
            max_leaves: usize::MAX,
            min_split: 2,
            max_features: None,
        }
    }

    fn gini_targets(y: &[u8]) -> Vec<Stats> {
        y.iter().map(|&v| Stats::new(1.0, f64::from(v))).collect()
    }

    fn gini_tree(x: &[Vec<f64>], y: &[u8], rows: &[usize], params: &TreeParams) -> DecisionTree {
        let mut rng = StdRng::seed_from_u64(3);
        DecisionTree::fit(x, &gini_targets(y), rows, params, Criterion::Gini, &mut rng)
    }

    #[test]
    fn test_gini_tree_separates_threshold() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<u8> = (0..20).map(|i| u8::from(i >= 10)).collect();
        let rows: Vec<usize> = (0..20).collect();
        let tree = gini_tree(&x, &y, &rows, &unlimited());

        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.predict_one(&[3.0]), 0.0);
        assert_eq!(tree.predict_one(&[15.0]), 1.0);
        // Threshold sits at the midpoint and is inclusive on the left
        assert_eq!(tree.predict_one(&[9.5]), 0.0);
        assert_eq!(tree.predict_one(&[9.6]), 1.0);
    }

    #[test]
    fn test_pure_node_is_single_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![1, 1, 1];
        let tree = gini_tree(&x, &y, &[0, 1, 2], &unlimited());

        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict_one(&[100.0]), 1.0);
    }

    #[test]
    fn test_max_leaves_respected() {
        // XOR-like pattern needs many leaves
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![(i % 8) as f64, (i / 8) as f64]).collect();
        let y: Vec<u8> = (0..64).map(|i| u8::from((i % 8 + i / 8) % 2 == 0)).collect();
        let rows: Vec<usize> = (0..64).collect();
        let params = TreeParams {
            max_leaves: 5,
            ..unlimited()
        };
        let tree = gini_tree(&x, &y, &rows, &params);
        assert!(tree.n_leaves() <= 5);
    }

    #[test]
    fn test_max_depth_respected() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<u8> = (0..64).map(|i| u8::from(i % 2 == 0)).collect();
        let rows: Vec<usize> = (0..64).collect();
        let params = TreeParams {
            max_depth: 3,
            ..unlimited()
        };
        let tree = gini_tree(&x, &y, &rows, &params);
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn test_min_split_blocks_small_nodes() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![0, 1, 0, 1, 0, 1];
        let params = TreeParams {
            min_split: 10,
            ..unlimited()
        };
        let tree = gini_tree(&x, &y, &[0, 1, 2, 3, 4, 5], &params);
        assert_eq!(tree.n_leaves(), 1);
        assert!((tree.predict_one(&[0.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_newton_leaf_values() {
        // Gradients of opposite sign on each side of x = 0.5
        let x = vec![vec![0.0], vec![0.0], vec![1.0], vec![1.0]];
        let targets = vec![
            Stats::new(1.0, 1.0),
            Stats::new(1.0, 1.0),
            Stats::new(1.0, -1.0),
            Stats::new(1.0, -1.0),
        ];
        let mut rng = StdRng::seed_from_u64(3);

        let tree = DecisionTree::fit(
            &x,
            &targets,
            &[0, 1, 2, 3],
            &unlimited(),
            Criterion::Newton { lambda: 0.0 },
            &mut rng,
        );

        assert!((tree.predict_one(&[0.0]) + 1.0).abs() < 1e-12);
        assert!((tree.predict_one(&[1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_features_do_not_split() {
        let x = vec![vec![5.0]; 10];
        let y = vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1];
        let rows: Vec<usize> = (0..10).collect();
        let tree = gini_tree(&x, &y, &rows, &unlimited());
        assert_eq!(tree.n_leaves(), 1);
    }
}
