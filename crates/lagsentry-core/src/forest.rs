//! Isolation Forest for Batch Outlier Scoring
//!
//! An ensemble of random isolation trees fitted once on a fixed corpus.
//! Points that are separated from the rest by few random cuts get a short
//! average path length and therefore a high anomaly score.
//!
//! - Each tree is grown on a subsample drawn without replacement
//! - Tree height is limited to `ceil(log2(subsample size))`
//! - The decision threshold is the `contamination` quantile of the
//!   training scores
//!
//! Reference: "Isolation Forest" (Liu, Ting, Zhou, ICDM 2008)

use crate::config::ModelParams;
use crate::error::ModelError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// A node in an isolation tree
#[derive(Serialize, Deserialize, Clone, Debug)]
enum IsoNode {
    /// Internal node: `x[split_dim] <= split_value` goes left
    Internal {
        split_dim: usize,
        split_value: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
    /// External node with the number of training rows that reached it
    Leaf { size: usize },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct IsoTree {
    root: IsoNode,
}

impl IsoTree {
    fn grow(rows: &[&[f64]], sample: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_recursive(rows, sample, 0, max_depth, rng),
        }
    }

    /// Depth of the leaf reached by `point`, plus the expected remaining
    /// depth for the rows that shared that leaf.
    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                IsoNode::Leaf { size } => return depth + average_path_length(*size),
                IsoNode::Internal {
                    split_dim,
                    split_value,
                    left,
                    right,
                } => {
                    node = if point[*split_dim] <= *split_value {
                        left
                    } else {
                        right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

fn grow_recursive(
    rows: &[&[f64]],
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> IsoNode {
    if depth >= max_depth || indices.len() <= 1 {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    // Only dimensions that still vary inside this node can split it
    let dims = rows[indices[0]].len();
    let mut candidates: Vec<(usize, f64, f64)> = Vec::with_capacity(dims);
    for dim in 0..dims {
        let (lo, hi) = indices
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(rows[i][dim]), hi.max(rows[i][dim]))
            });
        if hi > lo {
            candidates.push((dim, lo, hi));
        }
    }
    if candidates.is_empty() {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    let (split_dim, lo, hi) = candidates[rng.random_range(0..candidates.len())];
    let split_value = uniform_split(lo, hi, rng);
    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .into_iter()
        .partition(|&i| rows[i][split_dim] <= split_value);

    IsoNode::Internal {
        split_dim,
        split_value,
        left: Box::new(grow_recursive(rows, left, depth + 1, max_depth, rng)),
        right: Box::new(grow_recursive(rows, right, depth + 1, max_depth, rng)),
    }
}

/// Uniform draw in `[lo, hi]`. The span of finite values near the `f64`
/// limits can overflow, so such draws are taken on the halved range.
fn uniform_split(lo: f64, hi: f64, rng: &mut StdRng) -> f64 {
    if (hi - lo).is_finite() {
        return rng.random_range(lo..hi);
    }
    let u: f64 = rng.random();
    (lo / 2.0 + u * (hi / 2.0 - lo / 2.0)) * 2.0
}

/// Average path length of an unsuccessful BST search over `n` items,
/// used to normalize path lengths.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in [0, 100]
fn percentile(values: &mut [f64], q: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

/// Fitted isolation forest. Immutable after [`IsolationForest::fit`].
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IsolationForest {
    trees: Vec<IsoTree>,
    /// Rows drawn per tree
    sample_size: usize,
    /// Input dimensionality
    n_features: usize,
    /// Scores below this are outliers
    offset: f64,
}

impl IsolationForest {
    /// Fit on `rows`, all of the same length.
    pub fn fit(rows: &[&[f64]], params: &ModelParams) -> Result<Self, ModelError> {
        let n_features = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(ModelError::EmptyCorpus),
        };
        if let Some(bad) = rows.iter().find(|r| r.len() != n_features) {
            return Err(ModelError::ShapeMismatch {
                expected: n_features,
                actual: bad.len(),
            });
        }
        if params.n_estimators == 0 || params.max_samples == 0 {
            return Err(ModelError::InvalidParams(
                "n_estimators and max_samples must be positive".into(),
            ));
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(ModelError::InvalidParams(format!(
                "contamination {} outside (0, 0.5]",
                params.contamination
            )));
        }

        let sample_size = params.max_samples.min(rows.len());
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;

        let mut master = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_estimators)
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(master.random::<u64>());
                let sample = rand::seq::index::sample(&mut rng, rows.len(), sample_size).into_vec();
                IsoTree::grow(rows, sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features,
            offset: 0.0,
        };

        let mut scores: Vec<f64> = rows.iter().map(|r| forest.score_sample(r)).collect();
        forest.offset = percentile(&mut scores, params.contamination * 100.0);

        Ok(forest)
    }

    /// Opposite of the anomaly score: in [-1, 0), lower is more abnormal.
    ///
    /// Callers must pass exactly `n_features` values.
    pub fn score_sample(&self, point: &[f64]) -> f64 {
        let norm = average_path_length(self.sample_size);
        if norm <= 0.0 {
            return -0.5;
        }
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;
        -(2f64).powf(-mean_path / norm)
    }

    /// Shifted score; negative means outlier
    pub fn decision_function(&self, point: &[f64]) -> f64 {
        self.score_sample(point) - self.offset
    }

    pub fn is_outlier(&self, point: &[f64]) -> bool {
        self.decision_function(point) < 0.0
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn gaussian_rows(n: usize, dims: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.01, 0.002).unwrap();
        (0..n)
            .map(|_| (0..dims).map(|_| normal.sample(&mut rng)).collect())
            .collect()
    }

    fn as_refs(rows: &[Vec<f64>]) -> Vec<&[f64]> {
        rows.iter().map(|r| r.as_slice()).collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3, "c(256) = {}", c256);
    }

    #[test]
    fn test_percentile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut values, 50.0), 3.0);
        assert_eq!(percentile(&mut values, 0.0), 1.0);
        assert_eq!(percentile(&mut values, 100.0), 5.0);
        assert!((percentile(&mut values, 10.0) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let rows = gaussian_rows(300, 8, 7);
        let params = ModelParams::default();
        let a = IsolationForest::fit(&as_refs(&rows), &params).unwrap();
        let b = IsolationForest::fit(&as_refs(&rows), &params).unwrap();

        assert_eq!(a.offset(), b.offset());
        for row in &rows[..20] {
            assert_eq!(a.score_sample(row), b.score_sample(row));
        }
    }

    #[test]
    fn test_detects_far_point() {
        let rows = gaussian_rows(500, 24, 11);
        let forest = IsolationForest::fit(&as_refs(&rows), &ModelParams::default()).unwrap();

        let spike = vec![5.0; 24];
        assert!(forest.is_outlier(&spike), "spike should be an outlier");
        assert!(forest.score_sample(&spike) < forest.score_sample(&vec![0.01; 24]));
    }

    #[test]
    fn test_contamination_bounds_training_flags() {
        let rows = gaussian_rows(500, 24, 3);
        let forest = IsolationForest::fit(&as_refs(&rows), &ModelParams::default()).unwrap();

        let flagged = rows.iter().filter(|r| forest.is_outlier(r)).count();
        assert!(flagged <= 10, "flagged {} of 500", flagged);
    }

    #[test]
    fn test_sample_size_capped_by_corpus() {
        let rows = gaussian_rows(40, 4, 5);
        let forest = IsolationForest::fit(&as_refs(&rows), &ModelParams::default()).unwrap();
        assert_eq!(forest.sample_size(), 40);
        assert_eq!(forest.n_estimators(), 100);
        assert_eq!(forest.n_features(), 4);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            IsolationForest::fit(&[], &ModelParams::default()),
            Err(ModelError::EmptyCorpus)
        ));

        let a = [1.0, 2.0];
        let b = [1.0];
        assert!(matches!(
            IsolationForest::fit(&[&a[..], &b[..]], &ModelParams::default()),
            Err(ModelError::ShapeMismatch { expected: 2, actual: 1 })
        ));

        let params = ModelParams {
            contamination: 0.9,
            ..Default::default()
        };
        assert!(matches!(
            IsolationForest::fit(&[&a[..]], &params),
            Err(ModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_extreme_magnitudes_fit() {
        let rows: Vec<Vec<f64>> = (0..50)
            .map(|i| {
                let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
                vec![sign * 1.0e308, 0.01 * i as f64, -sign * 1.0e308]
            })
            .collect();
        let forest = IsolationForest::fit(&as_refs(&rows), &ModelParams::default()).unwrap();
        assert!(forest.offset().is_finite());
        assert!(forest.score_sample(&[0.0, 0.0, 0.0]).is_finite());

        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let v = uniform_split(-f64::MAX, f64::MAX, &mut rng);
            assert!(v.is_finite());
        }
    }
}
