//! Unsupervised anomaly scoring over review feature vectors.
//!
//! Isolation-forest style ensemble: each tree recursively splits a random
//! subsample on a random dimension at a random cut point. Anomalous points
//! live in sparse regions and isolate after few splits, so a short average
//! path length marks an outlier (Liu, Ting, Zhou 2008).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

use crate::error::AnalysisError;
use crate::features::FeatureVector;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Scoring outcome, index-aligned with the input vectors.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// true = outlier.
    pub labels: Vec<bool>,
    /// Min-max rescaled decision scores in [0, 1]; all 0 when the batch is
    /// degenerate (every raw score identical).
    pub scores: Vec<f64>,
}

/// Random partitioning ensemble with a seedable RNG so identical inputs and
/// seed reproduce identical output.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    random_state: Option<u64>,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationForest {
    pub fn new() -> Self {
        IsolationForest {
            n_estimators: 1000,
            max_samples: 256,
            random_state: None,
        }
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n.max(1);
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n.max(1);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Score a batch and label approximately `contamination * n` points as
    /// outliers.
    pub fn score(
        &self,
        vectors: &[FeatureVector],
        contamination: f64,
    ) -> Result<ScoreResult, AnalysisError> {
        if vectors.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        if !(contamination > 0.0 && contamination < 1.0) {
            return Err(AnalysisError::InvalidContamination(contamination));
        }

        let n = vectors.len();
        let psi = self.max_samples.min(n);
        let max_depth = (psi as f64).log2().ceil().max(0.0) as usize;

        let mut master = match self.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(rand::random()),
        };
        // Tree seeds are drawn up front from the master stream, so building
        // trees in parallel would not change the result.
        let tree_seeds: Vec<u64> = (0..self.n_estimators).map(|_| master.gen()).collect();

        let mut path_sums = vec![0.0f64; n];
        for seed in tree_seeds {
            let mut rng = StdRng::seed_from_u64(seed);
            let sample: Vec<FeatureVector> = if psi < n {
                rand::seq::index::sample(&mut rng, n, psi)
                    .into_vec()
                    .into_iter()
                    .map(|i| vectors[i])
                    .collect()
            } else {
                vectors.to_vec()
            };
            let tree = build_node(&sample, 0, max_depth, &mut rng);
            for (sum, vector) in path_sums.iter_mut().zip(vectors) {
                *sum += path_length(&tree, vector, 0.0);
            }
        }

        let c_psi = average_path_length(psi);
        let raw: Vec<f64> = path_sums
            .iter()
            .map(|&sum| {
                let mean = sum / self.n_estimators as f64;
                if c_psi > 0.0 {
                    2f64.powf(-mean / c_psi)
                } else {
                    0.5
                }
            })
            .collect();

        // Decision threshold: the contamination quantile of raw scores. Ties
        // resolve by input order so the labeled count stays exact.
        let k = ((contamination * n as f64).round() as usize).min(n);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            raw[b]
                .partial_cmp(&raw[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        let mut labels = vec![false; n];
        for &i in order.iter().take(k) {
            labels[i] = true;
        }

        let scores = rescale(&raw);
        tracing::debug!(
            reviews = n,
            outliers = k,
            trees = self.n_estimators,
            "isolation ensemble scored batch"
        );
        Ok(ScoreResult { labels, scores })
    }
}

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        dim: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

fn dim_range(points: &[FeatureVector], dim: usize) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for p in points {
        lo = lo.min(p[dim]);
        hi = hi.max(p[dim]);
    }
    (lo, hi)
}

fn build_node(points: &[FeatureVector], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if points.len() <= 1 || depth >= max_depth {
        return Node::Leaf { size: points.len() };
    }
    // Random dimension; fall back to the other one when the first has no
    // spread, and stop when neither does.
    let first = rng.gen_range(0..2usize);
    let dim = [first, 1 - first].into_iter().find(|&d| {
        let (lo, hi) = dim_range(points, d);
        hi > lo
    });
    let Some(dim) = dim else {
        return Node::Leaf { size: points.len() };
    };
    let (lo, hi) = dim_range(points, dim);
    let value = rng.gen_range(lo..hi);
    let (left, right): (Vec<FeatureVector>, Vec<FeatureVector>) =
        points.iter().copied().partition(|p| p[dim] < value);
    Node::Split {
        dim,
        value,
        left: Box::new(build_node(&left, depth + 1, max_depth, rng)),
        right: Box::new(build_node(&right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, point: &FeatureVector, depth: f64) -> f64 {
    match node {
        // Unresolved leaves are credited the expected path length of a
        // random search over their remaining size.
        Node::Leaf { size } => depth + average_path_length(*size),
        Node::Split {
            dim,
            value,
            left,
            right,
        } => {
            if point[*dim] < *value {
                path_length(left, point, depth + 1.0)
            } else {
                path_length(right, point, depth + 1.0)
            }
        }
    }
}

/// c(n): expected path length of an unsuccessful BST search over n points,
/// 2H(n-1) - 2(n-1)/n with the harmonic number approximated via ln + gamma.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear rescale to [0, 1] across the batch. An all-equal batch maps to all
/// zeros rather than dividing by zero; that is the documented policy for the
/// degenerate case, not an error.
fn rescale(raw: &[f64]) -> Vec<f64> {
    let lo = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi - lo <= f64::EPSILON {
        return vec![0.0; raw.len()];
    }
    raw.iter().map(|&r| (r - lo) / (hi - lo)).collect()
}
