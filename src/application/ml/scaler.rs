//! Standardization of features and the log-return target.
//!
//! Statistics are fitted once on the training partition, persisted, and
//! loaded read-only for inference. A fitted scaler is never refit, so a
//! shared `Arc<ReturnScaler>` can be read concurrently without locking.

use crate::domain::errors::PredictionError;
use crate::domain::features::{FeatureRow, FeatureTable};
use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Persisted scaler statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub feature_names: Vec<String>,
    pub feature_mean: Vec<f64>,
    pub feature_scale: Vec<f64>,
    pub target_mean: f64,
    pub target_scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct FeatureStats {
    names: Vec<String>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TargetStats {
    mean: f64,
    scale: f64,
}

/// Zero-variance columns keep scale 1.0 so they pass through centered.
fn guard_scale(std: f64) -> f64 {
    if std > 0.0 && std.is_finite() { std } else { 1.0 }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnScaler {
    features: Option<FeatureStats>,
    target: Option<TargetStats>,
}

impl ReturnScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feature columns seen at fit time; empty before fitting.
    pub fn feature_names(&self) -> &[String] {
        self.features.as_ref().map(|f| f.names.as_slice()).unwrap_or(&[])
    }

    pub fn is_fitted(&self) -> bool {
        self.features.is_some() && self.target.is_some()
    }

    /// Per-column mean and population std from the training matrix.
    pub fn fit(&mut self, matrix: &Array2<f64>, names: &[String]) -> Result<(), PredictionError> {
        if matrix.nrows() == 0 {
            return Err(PredictionError::InsufficientHistory {
                symbol: "training partition".to_string(),
                required: 1,
                available: 0,
            });
        }
        if names.len() != matrix.ncols() {
            return Err(PredictionError::FeatureMismatch {
                expected: names.len(),
                actual: matrix.ncols(),
            });
        }

        let mean = matrix
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(matrix.ncols()));
        let scale = matrix.std_axis(Axis(0), 0.0).mapv(guard_scale);

        self.features = Some(FeatureStats {
            names: names.to_vec(),
            mean,
            scale,
        });
        Ok(())
    }

    pub fn transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, PredictionError> {
        let stats = self
            .features
            .as_ref()
            .ok_or(PredictionError::ScalerNotFitted {
                component: "features",
            })?;
        if matrix.ncols() != stats.mean.len() {
            return Err(PredictionError::FeatureMismatch {
                expected: stats.mean.len(),
                actual: matrix.ncols(),
            });
        }
        Ok((matrix - &stats.mean) / &stats.scale)
    }

    pub fn fit_target(&mut self, returns: &[f64]) -> Result<(), PredictionError> {
        if returns.is_empty() {
            return Err(PredictionError::InsufficientHistory {
                symbol: "training partition".to_string(),
                required: 1,
                available: 0,
            });
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

        self.target = Some(TargetStats {
            mean,
            scale: guard_scale(variance.sqrt()),
        });
        Ok(())
    }

    fn target_stats(&self) -> Result<TargetStats, PredictionError> {
        self.target.ok_or(PredictionError::ScalerNotFitted { component: "target" })
    }

    pub fn transform_target(&self, returns: &[f64]) -> Result<Vec<f64>, PredictionError> {
        let stats = self.target_stats()?;
        Ok(returns.iter().map(|r| (r - stats.mean) / stats.scale).collect())
    }

    /// Inverse of a single standardized daily return.
    pub fn inverse_target(&self, values: &[f64]) -> Result<Vec<f64>, PredictionError> {
        let stats = self.target_stats()?;
        Ok(values.iter().map(|v| v * stats.scale + stats.mean).collect())
    }

    /// Real cumulative return from a sum of `h` standardized daily returns.
    ///
    /// `sum((r_t - mean) / scale) * scale + h * mean == sum(r_t)`. Treating the
    /// sum as a single standardized value would add `mean` once instead of
    /// `h` times and bias every multi-day horizon.
    pub fn inverse_cumulative(&self, values: &[f64], horizon_days: usize) -> Result<Vec<f64>, PredictionError> {
        let stats = self.target_stats()?;
        let offset = horizon_days as f64 * stats.mean;
        Ok(values.iter().map(|v| v * stats.scale + offset).collect())
    }

    fn feature_matrix(table: &FeatureTable) -> Result<Array2<f64>, PredictionError> {
        let width = table.feature_names().len();
        let flat: Vec<f64> = table
            .rows()
            .iter()
            .flat_map(|r| r.features.iter().copied())
            .collect();
        Array2::from_shape_vec((table.len(), width), flat).map_err(|e| {
            PredictionError::InvalidFeatureTable {
                symbol: table.symbol().to_string(),
                reason: format!("feature rows do not match {} named columns: {}", width, e),
            }
        })
    }

    /// Fit feature and target statistics on a training partition.
    pub fn fit_table(&mut self, train: &FeatureTable) -> Result<(), PredictionError> {
        self.fit(&Self::feature_matrix(train)?, train.feature_names())?;
        self.fit_target(&train.log_returns())
    }

    /// Standardized copy of a table: features with feature statistics, the
    /// log-return column with target statistics. `close` is untouched.
    pub fn transform_table(&self, table: &FeatureTable) -> Result<FeatureTable, PredictionError> {
        if let Some(stats) = &self.features {
            if stats.names.as_slice() != table.feature_names() {
                return Err(PredictionError::FeatureMismatch {
                    expected: stats.names.len(),
                    actual: table.feature_names().len(),
                });
            }
        }
        let scaled = self.transform(&Self::feature_matrix(table)?)?;
        let returns = self.transform_target(&table.log_returns())?;

        let rows = table
            .rows()
            .iter()
            .zip(scaled.outer_iter())
            .zip(returns)
            .map(|((row, features), log_return)| FeatureRow {
                date: row.date,
                close: row.close,
                features: features.to_vec(),
                log_return,
            })
            .collect();
        Ok(table.with_rows(rows))
    }

    pub fn state(&self) -> Result<ScalerState, PredictionError> {
        let features = self.features.as_ref().ok_or(PredictionError::ScalerNotFitted {
            component: "features",
        })?;
        let target = self.target_stats()?;
        Ok(ScalerState {
            feature_names: features.names.clone(),
            feature_mean: features.mean.to_vec(),
            feature_scale: features.scale.to_vec(),
            target_mean: target.mean,
            target_scale: target.scale,
        })
    }

    pub fn from_state(state: ScalerState) -> Result<Self, PredictionError> {
        let width = state.feature_names.len();
        if state.feature_mean.len() != width || state.feature_scale.len() != width {
            return Err(PredictionError::FeatureMismatch {
                expected: width,
                actual: state.feature_mean.len().max(state.feature_scale.len()),
            });
        }
        Ok(Self {
            features: Some(FeatureStats {
                names: state.feature_names,
                mean: Array1::from(state.feature_mean),
                scale: Array1::from(state.feature_scale).mapv(guard_scale),
            }),
            target: Some(TargetStats {
                mean: state.target_mean,
                scale: guard_scale(state.target_scale),
            }),
        })
    }

    /// Persist fitted statistics as JSON (write to temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.state()?;
        let content =
            serde_json::to_string_pretty(&state).context("Failed to serialize scaler state")?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content).context("Failed to write scaler temp file")?;
        fs::rename(&temp_path, path).context("Failed to rename scaler file")?;
        info!("Saved scaler state to {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler file {:?}", path))?;
        let state: ScalerState =
            serde_json::from_str(&content).context("Failed to parse scaler state JSON")?;
        Ok(Self::from_state(state)?)
    }
}
