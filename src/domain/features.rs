//! Per-symbol feature tables produced by the feature store.

use crate::domain::errors::PredictionError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Name of the raw daily log-return column.
pub const LOG_RETURN_COLUMN: &str = "log_return";

/// One trading day of stationary engineered indicators.
///
/// `log_return` is `ln(close[t] / close[t-1])`; `close` is kept only to
/// anchor predicted prices and never enters a model input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub close: f64,
    pub features: Vec<f64>,
    pub log_return: f64,
}

impl FeatureRow {
    fn is_finite(&self) -> bool {
        self.close.is_finite()
            && self.log_return.is_finite()
            && self.features.iter().all(|v| v.is_finite())
    }
}

/// Date-ordered feature rows for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    symbol: String,
    feature_names: Vec<String>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Build a table, dropping rows carrying NaN/Inf.
    ///
    /// Rows must be strictly ascending by date and every row must carry one
    /// value per feature name.
    pub fn new(
        symbol: impl Into<String>,
        feature_names: Vec<String>,
        rows: Vec<FeatureRow>,
    ) -> Result<Self, PredictionError> {
        let symbol = symbol.into();

        if feature_names.iter().any(|n| n == LOG_RETURN_COLUMN) {
            return Err(PredictionError::InvalidFeatureTable {
                symbol,
                reason: format!("'{}' must not be listed as a feature", LOG_RETURN_COLUMN),
            });
        }

        if let Some(bad) = rows.iter().find(|r| r.features.len() != feature_names.len()) {
            return Err(PredictionError::InvalidFeatureTable {
                reason: format!(
                    "row {} has {} features, expected {}",
                    bad.date,
                    bad.features.len(),
                    feature_names.len()
                ),
                symbol,
            });
        }

        let original_len = rows.len();
        let rows: Vec<FeatureRow> = rows.into_iter().filter(FeatureRow::is_finite).collect();
        if rows.len() < original_len {
            warn!(
                "FeatureTable [{}]: dropped {} rows with NaN/Inf values",
                symbol,
                original_len - rows.len()
            );
        }

        if let Some(pair) = rows.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(PredictionError::InvalidFeatureTable {
                reason: format!(
                    "dates not strictly ascending at {} -> {}",
                    pair[0].date, pair[1].date
                ),
                symbol,
            });
        }

        Ok(Self {
            symbol,
            feature_names,
            rows,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of a sequence-model row: every feature plus the log-return.
    pub fn sequence_width(&self) -> usize {
        self.feature_names.len() + 1
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.log_return).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    /// Close of the most recent row.
    pub fn last_close(&self) -> Option<f64> {
        self.rows.last().map(|r| r.close)
    }

    /// Same symbol and columns, different rows. Rows are assumed valid.
    pub(crate) fn with_rows(&self, rows: Vec<FeatureRow>) -> Self {
        Self {
            symbol: self.symbol.clone(),
            feature_names: self.feature_names.clone(),
            rows,
        }
    }

    /// Split into train / validation / test partitions in date order.
    pub fn split_chronological(&self, train_ratio: f64, val_ratio: f64) -> (Self, Self, Self) {
        let n = self.rows.len();
        let train_end = ((n as f64) * train_ratio) as usize;
        let val_end = (((n as f64) * (train_ratio + val_ratio)) as usize).min(n);
        let train_end = train_end.min(val_end);

        (
            self.with_rows(self.rows[..train_end].to_vec()),
            self.with_rows(self.rows[train_end..val_end].to_vec()),
            self.with_rows(self.rows[val_end..].to_vec()),
        )
    }
}
