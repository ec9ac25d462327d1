use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::features::FeatureBuilder;
use super::gbt::{GbtParams, GradientBoostedTrees, ModelError};
use super::scaler::MinMaxScaler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub lookback_window: usize,
    pub min_price_points: usize,
    pub min_feature_rows: usize,
    /// Cumulative split boundaries: rows before `train_split * n` train, rows
    /// before `validation_split * n` validate, the rest test.
    pub train_split: f64,
    pub validation_split: f64,
    pub gbt: GbtParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            lookback_window: 10,
            min_price_points: 60,
            min_feature_rows: 30,
            train_split: 0.70,
            validation_split: 0.85,
            gbt: GbtParams::default(),
        }
    }
}

/// A fitted model plus the scaler its inputs were normalized with.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub model: GradientBoostedTrees,
    pub scaler: MinMaxScaler,
    pub lookback: usize,
}

impl ModelArtifact {
    /// Predicts from the last feature row of `closes` and maps the result
    /// back to price space.
    pub fn predict_next(&self, closes: &[f64]) -> Result<f64, ModelError> {
        let scaled = self.scaler.transform_all(closes);
        let features = FeatureBuilder::new(self.lookback).build(&scaled);
        let row = features.rows.last().ok_or(ModelError::EmptyTrainingSet)?;
        if !row.is_finite() {
            return Err(ModelError::NonFinite("prediction features"));
        }

        let next_scaled = self.model.predict_row(row.to_array().view());
        let next = self.scaler.inverse(next_scaled);
        if !next.is_finite() {
            return Err(ModelError::NonFinite("prediction output"));
        }
        Ok(next)
    }
}

/// Outcome of one training run. A failed run carries no model and zero
/// scores; zero means "no confidence", not a perfect fit.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub artifact: Option<ModelArtifact>,
    pub mae_val: f64,
    pub mae_test: f64,
    pub samples: usize,
    pub failure: Option<String>,
}

impl TrainingReport {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            artifact: None,
            mae_val: 0.0,
            mae_test: 0.0,
            samples: 0,
            failure: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.artifact.is_some()
    }
}

pub fn mean_absolute_error(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Chronological split points `(train_end, val_end)` for `n` rows.
pub fn split_points(n: usize, train_split: f64, validation_split: f64) -> (usize, usize) {
    let train_end = (n as f64 * train_split).floor() as usize;
    let val_end = (n as f64 * validation_split).floor() as usize;
    (train_end.min(n), val_end.clamp(train_end.min(n), n))
}

#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    config: TrainerConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Fits a fresh model on `closes`. Never panics; every fault is reported
    /// through a failed `TrainingReport`.
    pub fn train(&self, closes: &[f64]) -> TrainingReport {
        if closes.len() < self.config.min_price_points {
            warn!(
                "Not enough price points to train: {} < {}",
                closes.len(),
                self.config.min_price_points
            );
            return TrainingReport::failed(format!(
                "{} price points, {} required",
                closes.len(),
                self.config.min_price_points
            ));
        }

        // Fit on the whole series before splitting.
        let Some(scaler) = MinMaxScaler::fit(closes) else {
            return TrainingReport::failed("price series contains non-finite values");
        };
        let scaled = scaler.transform_all(closes);

        let features = FeatureBuilder::new(self.config.lookback_window).build(&scaled);
        if features.len() < self.config.min_feature_rows {
            warn!(
                "Not enough feature rows to train: {} < {}",
                features.len(),
                self.config.min_feature_rows
            );
            return TrainingReport::failed(format!(
                "{} feature rows, {} required",
                features.len(),
                self.config.min_feature_rows
            ));
        }

        let x = match features.matrix() {
            Ok(x) => x,
            Err(e) => return TrainingReport::failed(e.to_string()),
        };
        let y = features.target_array();

        match self.fit_partitions(&x, &y) {
            Ok((model, mae_val, mae_test)) => {
                info!(
                    "Model trained: {} samples, {} trees, MAE val {:.6}, MAE test {:.6}",
                    features.len(),
                    model.num_trees(),
                    mae_val,
                    mae_test
                );
                TrainingReport {
                    artifact: Some(ModelArtifact {
                        model,
                        scaler,
                        lookback: self.config.lookback_window,
                    }),
                    mae_val,
                    mae_test,
                    samples: features.len(),
                    failure: None,
                }
            }
            Err(e) => {
                warn!("Model training failed: {}", e);
                TrainingReport::failed(e.to_string())
            }
        }
    }

    fn fit_partitions(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Result<(GradientBoostedTrees, f64, f64), ModelError> {
        let n = y.len();
        let (train_end, val_end) =
            split_points(n, self.config.train_split, self.config.validation_split);
        debug!("Split {} rows: train {}, val {}, test {}", n, train_end, val_end - train_end, n - val_end);

        let x_train = x.slice(s![..train_end, ..]).to_owned();
        let y_train = y.slice(s![..train_end]).to_owned();
        let x_val = x.slice(s![train_end..val_end, ..]).to_owned();
        let y_val = y.slice(s![train_end..val_end]).to_owned();
        let x_test = x.slice(s![val_end.., ..]).to_owned();
        let y_test = y.slice(s![val_end..]).to_owned();

        let model = GradientBoostedTrees::fit(&self.config.gbt, &x_train, &y_train, &x_val, &y_val)?;

        let mae_val = mean_absolute_error(&y_val, &model.predict(&x_val)?);
        let mae_test = mean_absolute_error(&y_test, &model.predict(&x_test)?);
        if !mae_val.is_finite() || !mae_test.is_finite() {
            return Err(ModelError::NonFinite("evaluation scores"));
        }

        Ok((model, mae_val, mae_test))
    }
}
