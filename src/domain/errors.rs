use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the forecasting pipeline and the serving layer.
///
/// Alignment and scaling failures must abort the request: a silently wrong
/// sign or scale on a cumulative return corrupts every downstream decision.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Insufficient history for {symbol}: need {required} rows, have {available}")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    #[error("Scaler not fitted: {component} statistics missing")]
    ScalerNotFitted { component: &'static str },

    #[error("No trained models for {symbol} at {path:?}")]
    ModelNotFound { symbol: String, path: PathBuf },

    #[error("Failed to load models for {symbol}: {reason}")]
    ModelLoadError { symbol: String, reason: String },

    #[error("Prediction unavailable for {symbol}: {reason}")]
    PredictionUnavailable { symbol: String, reason: String },

    #[error("Feature width mismatch: scaler expects {expected} columns, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Invalid feature table for {symbol}: {reason}")]
    InvalidFeatureTable { symbol: String, reason: String },

    #[error("Alignment mismatch at {date} ({horizon}): sequence target {sequence}, tabular target {tabular}")]
    AlignmentMismatch {
        date: chrono::NaiveDate,
        horizon: String,
        sequence: f64,
        tabular: f64,
    },

    #[error("Unsupported horizon: {0} days")]
    InvalidHorizon(u32),

    #[error("Inference failed in {model}: {reason}")]
    InferenceFailed { model: String, reason: String },
}

impl PredictionError {
    /// Whether a later retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PredictionError::ModelLoadError { .. }
                | PredictionError::PredictionUnavailable { .. }
                | PredictionError::InferenceFailed { .. }
        )
    }

    /// Whether the symbol is untrained or misconfigured (surfaced as "not found").
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PredictionError::ModelNotFound { .. } | PredictionError::ScalerNotFitted { .. }
        )
    }
}
