//! Offline pipeline settings: artifact locations, window length and the
//! chronological split used for fitting and weight optimization.

use super::{Lookup, parse_or, string_or};
use anyhow::{Result, ensure};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PipelineEnvConfig {
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
    pub sequence_length: usize,
    pub train_split: f64,
    pub validation_split: f64,
}

impl Default for PipelineEnvConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("data/models"),
            data_dir: PathBuf::from("data/features"),
            sequence_length: 90,
            train_split: 0.7,
            validation_split: 0.15,
        }
    }
}

impl PipelineEnvConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            model_dir: PathBuf::from(string_or(lookup, "FINPREDICT_MODEL_DIR", "data/models")),
            data_dir: PathBuf::from(string_or(lookup, "FINPREDICT_DATA_DIR", "data/features")),
            sequence_length: parse_or(lookup, "SEQUENCE_LENGTH", defaults.sequence_length)?,
            train_split: parse_or(lookup, "TRAIN_SPLIT", defaults.train_split)?,
            validation_split: parse_or(lookup, "VALIDATION_SPLIT", defaults.validation_split)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.sequence_length >= 1, "SEQUENCE_LENGTH must be at least 1");
        ensure!(
            self.train_split > 0.0 && self.validation_split >= 0.0,
            "TRAIN_SPLIT must be positive and VALIDATION_SPLIT non-negative"
        );
        ensure!(
            self.train_split + self.validation_split < 1.0,
            "TRAIN_SPLIT + VALIDATION_SPLIT must be below 1.0 (got {} + {})",
            self.train_split,
            self.validation_split
        );
        Ok(())
    }
}
