//! Temporal alignment of sequence and tabular model inputs.
//!
//! Both representations are cut from the same feature table over the same
//! index range, so a target date present in both carries the identical
//! cumulative-return target. The two model families are trained and blended
//! sample-by-sample, so any drift between them silently corrupts the ensemble.

use crate::domain::errors::PredictionError;
use crate::domain::features::FeatureTable;
use crate::domain::horizon::Horizon;
use crate::domain::ml::{SequenceSamples, SequenceWindow, TabularSamples};
use ndarray::{Array2, s};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;

/// Lags of the target column added to every tabular row.
pub const LAG_PERIODS: [usize; 6] = [1, 3, 5, 7, 14, 30];

/// Trailing windows for rolling mean / sample std of the target column.
pub const ROLLING_WINDOWS: [usize; 3] = [5, 10, 20];

/// Rows of history a tabular row needs behind it.
pub const TABULAR_LOOKBACK: usize = 30;

/// Tabular row width for `feature_count` engineered features.
pub fn tabular_width(feature_count: usize) -> usize {
    feature_count + LAG_PERIODS.len() + 2 * ROLLING_WINDOWS.len()
}

#[derive(Debug, Clone)]
pub struct TemporalAligner {
    sequence_length: usize,
    horizons: Vec<Horizon>,
}

impl TemporalAligner {
    /// Aligner over every known horizon.
    pub fn new(sequence_length: usize) -> Self {
        Self::with_horizons(sequence_length, Horizon::ALL.to_vec())
    }

    pub fn with_horizons(sequence_length: usize, mut horizons: Vec<Horizon>) -> Self {
        horizons.sort();
        horizons.dedup();
        if horizons.is_empty() {
            horizons = Horizon::ALL.to_vec();
        }
        Self {
            sequence_length: sequence_length.max(1),
            horizons,
        }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn horizons(&self) -> &[Horizon] {
        &self.horizons
    }

    fn max_horizon(&self) -> usize {
        self.horizons.iter().map(|h| h.days()).max().unwrap_or(1)
    }

    /// Rows needed to emit at least one training sample.
    pub fn min_training_rows(&self) -> usize {
        self.sequence_length + self.max_horizon()
    }

    /// Rows needed to emit the live window and tabular row.
    pub fn min_inference_rows(&self) -> usize {
        self.sequence_length.max(TABULAR_LOOKBACK + 1)
    }

    /// Index range of target dates: `[L, N - max(H) + 1)`.
    fn sample_range(&self, table: &FeatureTable) -> Result<Range<usize>, PredictionError> {
        let n = table.len();
        let required = self.min_training_rows();
        if n < required {
            return Err(PredictionError::InsufficientHistory {
                symbol: table.symbol().to_string(),
                required,
                available: n,
            });
        }
        Ok(self.sequence_length..(n - self.max_horizon() + 1))
    }

    fn ensure_horizon(&self, horizon: Horizon) -> Result<(), PredictionError> {
        if self.horizons.contains(&horizon) {
            Ok(())
        } else {
            Err(PredictionError::InvalidHorizon(horizon.days() as u32))
        }
    }

    /// `N x (F + 1)` matrix of `[features..., log_return]` rows.
    fn sequence_matrix(table: &FeatureTable) -> Result<Array2<f64>, PredictionError> {
        let width = table.sequence_width();
        let mut flat = Vec::with_capacity(table.len() * width);
        for row in table.rows() {
            flat.extend_from_slice(&row.features);
            flat.push(row.log_return);
        }
        Array2::from_shape_vec((table.len(), width), flat).map_err(|e| {
            PredictionError::InvalidFeatureTable {
                symbol: table.symbol().to_string(),
                reason: format!("rows do not form a {} column matrix: {}", width, e),
            }
        })
    }

    /// Sliding windows `[i - L, i)` with targets `sum(log_return[i .. i + h))`.
    ///
    /// The target column is read from the table as given, so a standardized
    /// table yields standardized summed targets.
    pub fn sequence_samples(&self, table: &FeatureTable) -> Result<SequenceSamples, PredictionError> {
        let range = self.sample_range(table)?;
        let matrix = Self::sequence_matrix(table)?;
        let returns = table.log_returns();
        let dates = table.dates();

        let mut samples = SequenceSamples {
            windows: Vec::with_capacity(range.len()),
            targets: self
                .horizons
                .iter()
                .map(|h| (*h, Vec::with_capacity(range.len())))
                .collect(),
            target_dates: Vec::with_capacity(range.len()),
        };

        for i in range {
            samples.windows.push(SequenceWindow {
                target_date: Some(dates[i]),
                values: matrix.slice(s![i - self.sequence_length..i, ..]).to_owned(),
            });
            for horizon in &self.horizons {
                let target = cumulative_sum(&returns[i..i + horizon.days()]);
                if let Some(targets) = samples.targets.get_mut(horizon) {
                    targets.push(target);
                }
            }
            samples.target_dates.push(dates[i]);
        }

        debug!(
            "TemporalAligner [{}]: {} sequence samples",
            table.symbol(),
            samples.len()
        );
        Ok(samples)
    }

    /// Column names of a tabular row, in row order.
    pub fn tabular_column_names(&self, table: &FeatureTable) -> Vec<String> {
        let mut names = table.feature_names().to_vec();
        for lag in LAG_PERIODS {
            names.push(format!("lag_{}", lag));
        }
        for window in ROLLING_WINDOWS {
            names.push(format!("roll_mean_{}", window));
            names.push(format!("roll_std_{}", window));
        }
        names
    }

    /// Feature row at index `j`: raw features, lags and rolling stats of the
    /// target column. `None` while the lookback is not yet filled.
    fn tabular_row(table: &FeatureTable, returns: &[f64], j: usize) -> Option<Vec<f64>> {
        if j < TABULAR_LOOKBACK || j >= returns.len() {
            return None;
        }

        let mut row = table.rows()[j].features.clone();
        for lag in LAG_PERIODS {
            row.push(returns[j - lag]);
        }
        for window in ROLLING_WINDOWS {
            let slice = &returns[j + 1 - window..=j];
            row.push(slice.iter().mean());
            row.push(slice.iter().std_dev());
        }
        Some(row)
    }

    /// Tabular samples for one horizon, keyed by the same target dates as
    /// [`Self::sequence_samples`].
    ///
    /// The target is a trailing rolling sum of width `h` shifted back by `h`,
    /// so the row at `i - 1` carries `sum(log_return[i .. i + h))`.
    pub fn tabular_samples(
        &self,
        table: &FeatureTable,
        horizon: Horizon,
    ) -> Result<TabularSamples, PredictionError> {
        self.ensure_horizon(horizon)?;
        let range = self.sample_range(table)?;
        let returns = table.log_returns();
        let dates = table.dates();
        let forward = forward_rolling_sum(&returns, horizon.days());

        let mut samples = TabularSamples {
            horizon: Some(horizon),
            column_names: self.tabular_column_names(table),
            ..Default::default()
        };

        for i in range {
            let feature_idx = i - 1;
            let (Some(row), Some(target)) = (
                Self::tabular_row(table, &returns, feature_idx),
                forward[feature_idx],
            ) else {
                continue;
            };
            samples.rows.push(row);
            samples.targets.push(target);
            samples.target_dates.push(dates[i]);
        }

        debug!(
            "TemporalAligner [{}]: {} tabular samples ({})",
            table.symbol(),
            samples.len(),
            horizon
        );
        Ok(samples)
    }

    /// Tabular samples for every configured horizon.
    pub fn tabular_samples_by_horizon(
        &self,
        table: &FeatureTable,
    ) -> Result<BTreeMap<Horizon, TabularSamples>, PredictionError> {
        self.horizons
            .iter()
            .map(|h| Ok((*h, self.tabular_samples(table, *h)?)))
            .collect()
    }

    fn ensure_inference_rows(&self, table: &FeatureTable) -> Result<(), PredictionError> {
        let required = self.min_inference_rows();
        if table.len() < required {
            return Err(PredictionError::InsufficientHistory {
                symbol: table.symbol().to_string(),
                required,
                available: table.len(),
            });
        }
        Ok(())
    }

    /// Live window: the last `L` rows, with no target.
    pub fn latest_sequence(&self, table: &FeatureTable) -> Result<SequenceWindow, PredictionError> {
        self.ensure_inference_rows(table)?;
        let n = table.len();
        let matrix = Self::sequence_matrix(table)?;
        Ok(SequenceWindow {
            target_date: None,
            values: matrix.slice(s![n - self.sequence_length..n, ..]).to_owned(),
        })
    }

    /// Live tabular row built from the last available date.
    pub fn latest_tabular(&self, table: &FeatureTable) -> Result<Vec<f64>, PredictionError> {
        self.ensure_inference_rows(table)?;
        let returns = table.log_returns();
        Self::tabular_row(table, &returns, table.len() - 1).ok_or_else(|| {
            PredictionError::InsufficientHistory {
                symbol: table.symbol().to_string(),
                required: TABULAR_LOOKBACK + 1,
                available: table.len(),
            }
        })
    }

    /// Check that every tabular target matches the sequence target for the
    /// same date. Returns the number of dates compared.
    pub fn verify_alignment(
        sequence: &SequenceSamples,
        tabular: &TabularSamples,
        horizon: Horizon,
        tolerance: f64,
    ) -> Result<usize, PredictionError> {
        let seq_targets = sequence
            .targets
            .get(&horizon)
            .ok_or(PredictionError::InvalidHorizon(horizon.days() as u32))?;

        let by_date: BTreeMap<_, _> = sequence
            .target_dates
            .iter()
            .zip(seq_targets.iter())
            .collect();

        let mut compared = 0;
        for (date, tab_target) in tabular.target_dates.iter().zip(tabular.targets.iter()) {
            let Some(seq_target) = by_date.get(date) else {
                continue;
            };
            if (**seq_target - tab_target).abs() > tolerance {
                return Err(PredictionError::AlignmentMismatch {
                    date: *date,
                    horizon: horizon.to_string(),
                    sequence: **seq_target,
                    tabular: *tab_target,
                });
            }
            compared += 1;
        }
        Ok(compared)
    }
}

fn cumulative_sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

/// `out[j] = sum(values[j + 1 ..= j + h])`, computed as a trailing rolling
/// sum evaluated at `j + h` and shifted back by `h`.
fn forward_rolling_sum(values: &[f64], h: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let trailing: Vec<Option<f64>> = (0..n)
        .map(|k| (k + 1 >= h).then(|| cumulative_sum(&values[k + 1 - h..=k])))
        .collect();
    (0..n)
        .map(|j| trailing.get(j + h).copied().flatten())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::FeatureRow;
    use chrono::{Duration, NaiveDate};

    #[test]
    fn test_ragged_rows_are_rejected() {
        let table = synthetic_table(120);
        let mut rows = table.rows().to_vec();
        rows[70].features.pop();
        let ragged = table.with_rows(rows);

        let aligner = TemporalAligner::new(60);
        assert!(matches!(
            aligner.sequence_samples(&ragged),
            Err(PredictionError::InvalidFeatureTable { .. })
        ));
        assert!(matches!(
            aligner.latest_sequence(&ragged),
            Err(PredictionError::InvalidFeatureTable { .. })
        ));
    }

    fn synthetic_table(n: usize) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let mut close = 100.0;
        let rows = (0..n)
            .map(|i| {
                let x = i as f64;
                let log_return = 0.01 * (x * 0.37).sin() + 0.002 * (x * 1.3).cos();
                close *= log_return.exp();
                FeatureRow {
                    date: start + Duration::days(i as i64),
                    close,
                    features: vec![(x * 0.11).sin(), (x * 0.05).cos() * 0.5],
                    log_return,
                }
            })
            .collect();
        FeatureTable::new(
            "XYZ",
            vec!["rsi_norm".to_string(), "bb_position".to_string()],
            rows,
        )
        .unwrap()
    }

    #[test]
    fn test_alignment_identity_all_horizons() {
        let table = synthetic_table(160);
        let aligner = TemporalAligner::new(40);
        let sequence = aligner.sequence_samples(&table).unwrap();

        for horizon in Horizon::ALL {
            let tabular = aligner.tabular_samples(&table, horizon).unwrap();
            let seq_targets = &sequence.targets[&horizon];

            assert!(!tabular.is_empty());
            for (k, date) in tabular.target_dates.iter().enumerate() {
                let idx = sequence
                    .target_dates
                    .iter()
                    .position(|d| d == date)
                    .expect("tabular date missing from sequence samples");
                assert!(
                    (seq_targets[idx] - tabular.targets[k]).abs() < 1e-9,
                    "target drift at {} for {}",
                    date,
                    horizon
                );
            }

            let compared =
                TemporalAligner::verify_alignment(&sequence, &tabular, horizon, 1e-9).unwrap();
            assert_eq!(compared, tabular.len());
        }
    }

    #[test]
    fn test_sample_range_and_target_dates() {
        let table = synthetic_table(160);
        let aligner = TemporalAligner::new(40);
        let sequence = aligner.sequence_samples(&table).unwrap();

        // i in [L, N - maxH + 1)
        assert_eq!(sequence.len(), 160 - 40 - 30 + 1);
        assert_eq!(sequence.target_dates[0], table.rows()[40].date);
        assert_eq!(sequence.windows[0].len(), 40);
        assert_eq!(sequence.windows[0].width(), 3);
        // Window ends strictly before its target date
        assert_eq!(sequence.windows[0].values[[39, 2]], table.rows()[39].log_return);

        let returns = table.log_returns();
        let expected: f64 = returns[40..47].iter().sum();
        assert!((sequence.targets[&Horizon::SevenDay][0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_tabular_row_layout() {
        let table = synthetic_table(160);
        let aligner = TemporalAligner::new(40);
        let tabular = aligner.tabular_samples(&table, Horizon::OneDay).unwrap();
        let returns = table.log_returns();

        assert_eq!(tabular.column_names.len(), tabular_width(2));
        assert_eq!(tabular_width(2), 2 + 6 + 6);
        assert_eq!(tabular.rows[0].len(), tabular.column_names.len());

        // First row is the feature date 39 for target date 40
        let row = &tabular.rows[0];
        assert_eq!(row[0], table.rows()[39].features[0]);
        assert_eq!(row[2], returns[38]); // lag_1
        assert_eq!(row[7], returns[9]); // lag_30
        let mean_5: f64 = returns[35..40].iter().sum::<f64>() / 5.0;
        assert!((row[8] - mean_5).abs() < 1e-12);
        assert!((tabular.targets[0] - returns[40]).abs() < 1e-15);
    }

    #[test]
    fn test_short_sequence_length_skips_rows_without_lookback() {
        let table = synthetic_table(80);
        let aligner = TemporalAligner::new(10);
        let sequence = aligner.sequence_samples(&table).unwrap();
        let tabular = aligner.tabular_samples(&table, Horizon::SevenDay).unwrap();

        // Tabular rows need 30 rows of lookback, so the set is a strict subset.
        assert!(tabular.len() < sequence.len());
        assert_eq!(tabular.target_dates[0], table.rows()[31].date);
        assert!(
            tabular
                .target_dates
                .iter()
                .all(|d| sequence.target_dates.contains(d))
        );
    }

    #[test]
    fn test_insufficient_history() {
        let table = synthetic_table(60);
        let aligner = TemporalAligner::new(40);

        let result = aligner.sequence_samples(&table);
        assert!(matches!(
            result,
            Err(PredictionError::InsufficientHistory {
                required: 70,
                available: 60,
                ..
            })
        ));
        assert!(aligner.tabular_samples(&table, Horizon::OneDay).is_err());
    }

    #[test]
    fn test_inference_emits_last_window_only() {
        let table = synthetic_table(60);
        let aligner = TemporalAligner::new(40);

        let window = aligner.latest_sequence(&table).unwrap();
        assert_eq!(window.target_date, None);
        assert_eq!(window.len(), 40);
        assert_eq!(window.values[[39, 2]], table.rows()[59].log_return);

        let row = aligner.latest_tabular(&table).unwrap();
        assert_eq!(row[0], table.rows()[59].features[0]);
        assert_eq!(row[2], table.rows()[58].log_return);

        let short = synthetic_table(30);
        assert!(matches!(
            aligner.latest_sequence(&short),
            Err(PredictionError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn test_unknown_horizon_rejected() {
        let table = synthetic_table(160);
        let aligner = TemporalAligner::with_horizons(40, vec![Horizon::OneDay]);
        assert!(matches!(
            aligner.tabular_samples(&table, Horizon::ThirtyDay),
            Err(PredictionError::InvalidHorizon(30))
        ));
    }

    #[test]
    fn test_verify_alignment_detects_drift() {
        let table = synthetic_table(160);
        let aligner = TemporalAligner::new(40);
        let sequence = aligner.sequence_samples(&table).unwrap();
        let mut tabular = aligner.tabular_samples(&table, Horizon::SevenDay).unwrap();
        tabular.targets[3] += 1e-3;

        let result = TemporalAligner::verify_alignment(&sequence, &tabular, Horizon::SevenDay, 1e-9);
        assert!(matches!(result, Err(PredictionError::AlignmentMismatch { .. })));
    }
}
