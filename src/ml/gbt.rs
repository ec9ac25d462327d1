//! Gradient-boosted regression trees trained on squared error.
//!
//! Each round fits one depth-limited tree to the current residuals using
//! second-order split gain `G^2 / (H + lambda)` (the hessian of squared error
//! is 1 per row), with per-tree row and column subsampling drawn from a seeded
//! `StdRng`. Leaf values are stored already shrunk by the learning rate.
//!
//! Validation RMSE drives early stopping; the fitted ensemble keeps trees up to
//! the best round only.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Non-finite values in {0}")]
    NonFinite(&'static str),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub lambda: f64,
    pub min_child_weight: f64,
    pub early_stopping_rounds: usize,
    pub seed: u64,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            max_depth: 8,
            learning_rate: 0.05,
            subsample: 0.8,
            colsample_bytree: 0.8,
            lambda: 1.0,
            min_child_weight: 1.0,
            early_stopping_rounds: 20,
            seed: 42,
        }
    }
}

impl GbtParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParams("n_estimators must be > 0".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ModelError::InvalidParams("learning_rate must be in (0, 1]".into()));
        }
        for (name, ratio) in [("subsample", self.subsample), ("colsample_bytree", self.colsample_bytree)] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ModelError::InvalidParams(format!("{} must be in (0, 1]", name)));
            }
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err(ModelError::InvalidParams(
                "lambda and min_child_weight must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Flat node arena; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeGrower<'a> {
    x: &'a Array2<f64>,
    residuals: &'a [f64],
    features: &'a [usize],
    params: &'a GbtParams,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeGrower<'a> {
    fn grow(mut self, rows: Vec<usize>) -> RegressionTree {
        self.build(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.residuals[r]).sum();
        let h = rows.len() as f64;
        let leaf = TreeNode::Leaf {
            value: self.params.learning_rate * g / (h + self.params.lambda),
        };

        let idx = self.nodes.len();
        self.nodes.push(leaf);

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }

        let Some(best) = self.best_split(&rows, g, h) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[[r, best.feature]] < best.threshold);

        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[idx] = TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;
        let mut sorted = rows.to_vec();

        for &feature in self.features {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut g_left = 0.0;
            for k in 1..sorted.len() {
                g_left += self.residuals[sorted[k - 1]];
                let lo = self.x[[sorted[k - 1], feature]];
                let hi = self.x[[sorted[k], feature]];
                if lo == hi {
                    continue;
                }

                let h_left = k as f64;
                let h_right = h - h_left;
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight {
                    continue;
                }

                let gain = self.score(g_left, h_left) + self.score(g - g_left, h_right) - parent;
                if gain <= 1e-12 || best.as_ref().map_or(false, |b| gain <= b.gain) {
                    continue;
                }

                let mut threshold = lo + (hi - lo) / 2.0;
                if threshold <= lo {
                    threshold = hi;
                }
                best = Some(SplitCandidate { feature, threshold, gain });
            }
        }

        best
    }
}

fn sample_size(len: usize, ratio: f64) -> usize {
    ((len as f64 * ratio).floor() as usize).clamp(1, len.max(1))
}

fn rmse(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let n = actual.len().max(1) as f64;
    (actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p) * (a - p))
        .sum::<f64>()
        / n)
        .sqrt()
}

fn all_finite<'a>(values: impl IntoIterator<Item = &'a f64>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
    best_iteration: usize,
    best_score: Option<f64>,
}

impl GradientBoostedTrees {
    /// Fits on the training partition, early-stopping on the validation
    /// partition when it is non-empty.
    pub fn fit(
        params: &GbtParams,
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        x_val: &Array2<f64>,
        y_val: &Array1<f64>,
    ) -> Result<Self, ModelError> {
        params.validate()?;

        let (n_train, n_features) = x_train.dim();
        if n_train == 0 || n_features == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if y_train.len() != n_train {
            return Err(ModelError::ShapeMismatch { expected: n_train, got: y_train.len() });
        }
        if x_val.nrows() != y_val.len() {
            return Err(ModelError::ShapeMismatch { expected: x_val.nrows(), got: y_val.len() });
        }
        if x_val.nrows() > 0 && x_val.ncols() != n_features {
            return Err(ModelError::ShapeMismatch { expected: n_features, got: x_val.ncols() });
        }
        if !all_finite(x_train.iter()) || !all_finite(y_train.iter()) {
            return Err(ModelError::NonFinite("training data"));
        }
        if !all_finite(x_val.iter()) || !all_finite(y_val.iter()) {
            return Err(ModelError::NonFinite("validation data"));
        }

        let base_score = y_train.mean().unwrap_or(0.0);
        let mut pred_train = Array1::from_elem(n_train, base_score);
        let mut pred_val = Array1::from_elem(y_val.len(), base_score);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let row_count = sample_size(n_train, params.subsample);
        let col_count = sample_size(n_features, params.colsample_bytree);

        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut best_score: Option<f64> = None;
        let mut best_iteration = 0;
        let mut rounds_since_best = 0;

        for round in 0..params.n_estimators {
            let residuals: Vec<f64> = y_train
                .iter()
                .zip(pred_train.iter())
                .map(|(y, p)| y - p)
                .collect();

            let rows = sample(&mut rng, n_train, row_count).into_vec();
            let mut features = sample(&mut rng, n_features, col_count).into_vec();
            features.sort_unstable();

            let tree = TreeGrower {
                x: x_train,
                residuals: &residuals,
                features: &features,
                params,
                nodes: Vec::new(),
            }
            .grow(rows);

            for (i, row) in x_train.rows().into_iter().enumerate() {
                pred_train[i] += tree.predict_row(row);
            }
            for (i, row) in x_val.rows().into_iter().enumerate() {
                pred_val[i] += tree.predict_row(row);
            }
            trees.push(tree);

            if y_val.is_empty() {
                continue;
            }

            let score = rmse(y_val, &pred_val);
            if best_score.map_or(true, |best| score < best) {
                best_score = Some(score);
                best_iteration = round;
                rounds_since_best = 0;
            } else {
                rounds_since_best += 1;
                if rounds_since_best >= params.early_stopping_rounds {
                    debug!(
                        "Early stopping at round {} (best round {}, val rmse {:.6})",
                        round,
                        best_iteration,
                        best_score.unwrap_or(f64::NAN)
                    );
                    break;
                }
            }
        }

        if best_score.is_some() {
            trees.truncate(best_iteration + 1);
        } else {
            best_iteration = trees.len().saturating_sub(1);
        }

        if !all_finite(pred_train.iter()) {
            return Err(ModelError::NonFinite("model output"));
        }

        Ok(Self {
            base_score,
            n_features,
            trees,
            best_iteration,
            best_score,
        })
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.nrows() > 0 && x.ncols() != self.n_features {
            return Err(ModelError::ShapeMismatch { expected: self.n_features, got: x.ncols() });
        }
        Ok(x.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    /// Validation RMSE at the best round, if a validation set was given.
    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(RegressionTree::depth).max().unwrap_or(0)
    }
}
