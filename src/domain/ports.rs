use crate::domain::errors::PredictionError;
use crate::domain::features::FeatureTable;
use crate::domain::ml::SequenceWindow;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Source of persisted per-symbol feature tables (last known history).
pub trait FeatureStore: Send + Sync {
    /// Rows sorted ascending by date. Missing data is `InsufficientHistory`.
    fn load_features(&self, symbol: &str) -> Result<FeatureTable, PredictionError>;
}

/// Live feature source consulted before falling back to the feature store.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_features(&self, symbol: &str) -> Result<FeatureTable>;
}

/// External key-value store holding serialized prediction payloads.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    /// Returns how many of the keys existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
    /// Keys matching a glob pattern (only a trailing `*` is interpreted).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Sequence model returning one standardized, horizon-summed value per window.
pub trait SequencePredictor: Send + Sync {
    fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>, PredictionError>;

    fn name(&self) -> &str;
}

/// Tabular model returning one real-unit cumulative return per row.
pub trait TabularPredictor: Send + Sync {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, PredictionError>;

    fn name(&self) -> &str;
}
