use crate::domain::errors::PredictionError;
use crate::domain::features::{FeatureRow, FeatureTable, LOG_RETURN_COLUMN};
use crate::domain::ports::FeatureStore;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads `<data_dir>/<SYMBOL>_features.csv`.
///
/// Expected header: `date,close,<feature columns...>,log_return`. Empty or
/// unparsable numeric cells become NaN and the row is dropped by the table.
pub struct CsvFeatureStore {
    data_dir: PathBuf,
}

impl CsvFeatureStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_features.csv", symbol.to_uppercase()))
    }

    fn parse_cell(cell: &str) -> f64 {
        cell.trim().parse::<f64>().unwrap_or(f64::NAN)
    }

    fn read_table(symbol: &str, path: &Path) -> Result<FeatureTable, PredictionError> {
        let invalid = |reason: String| PredictionError::InvalidFeatureTable {
            symbol: symbol.to_string(),
            reason,
        };

        let mut reader = csv::Reader::from_path(path).map_err(|e| invalid(e.to_string()))?;
        let headers = reader.headers().map_err(|e| invalid(e.to_string()))?.clone();
        let columns: Vec<&str> = headers.iter().map(str::trim).collect();

        let date_idx = columns.iter().position(|c| *c == "date");
        let close_idx = columns.iter().position(|c| *c == "close");
        let return_idx = columns.iter().position(|c| *c == LOG_RETURN_COLUMN);
        let (Some(date_idx), Some(close_idx), Some(return_idx)) = (date_idx, close_idx, return_idx)
        else {
            return Err(invalid(format!(
                "header must contain date, close and {}",
                LOG_RETURN_COLUMN
            )));
        };

        let feature_idx: Vec<usize> = (0..columns.len())
            .filter(|i| *i != date_idx && *i != close_idx && *i != return_idx)
            .collect();
        let feature_names = feature_idx.iter().map(|i| columns[*i].to_string()).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| invalid(e.to_string()))?;
            let date_cell = record.get(date_idx).unwrap_or("");
            // Accept both plain dates and datetime prefixes
            let date = NaiveDate::parse_from_str(date_cell.get(..10).unwrap_or(date_cell), "%Y-%m-%d")
                .map_err(|e| invalid(format!("bad date '{}': {}", date_cell, e)))?;
            rows.push(FeatureRow {
                date,
                close: Self::parse_cell(record.get(close_idx).unwrap_or("")),
                features: feature_idx
                    .iter()
                    .map(|i| Self::parse_cell(record.get(*i).unwrap_or("")))
                    .collect(),
                log_return: Self::parse_cell(record.get(return_idx).unwrap_or("")),
            });
        }

        FeatureTable::new(symbol, feature_names, rows)
    }
}

impl FeatureStore for CsvFeatureStore {
    fn load_features(&self, symbol: &str) -> Result<FeatureTable, PredictionError> {
        let symbol = symbol.to_uppercase();
        let path = self.path_for(&symbol);
        if !path.exists() {
            return Err(PredictionError::InsufficientHistory {
                symbol,
                required: 1,
                available: 0,
            });
        }
        let table = Self::read_table(&symbol, &path)?;
        debug!("Loaded {} feature rows for {} from {:?}", table.len(), symbol, path);
        Ok(table)
    }
}
