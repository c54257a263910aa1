use crate::domain::errors::PredictionError;
use crate::domain::ports::TabularPredictor;
use anyhow::{Context, Result};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::info;

pub type ForestModel = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Random forest over the flat tabular rows, persisted as JSON.
pub struct SmartCoreTabularPredictor {
    model: ForestModel,
    feature_count: usize,
    label: String,
}

impl SmartCoreTabularPredictor {
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        params: RandomForestRegressorParameters,
    ) -> Result<Self> {
        let feature_count = rows.first().map(Vec::len).unwrap_or(0);
        let x = DenseMatrix::from_2d_vec(&rows.to_vec())
            .map_err(|e| anyhow::anyhow!("Matrix error: {}", e))?;
        let model = RandomForestRegressor::fit(&x, &targets.to_vec(), params)
            .map_err(|e| anyhow::anyhow!("Training error: {}", e))?;
        Ok(Self {
            model,
            feature_count,
            label: "smartcore:random_forest".to_string(),
        })
    }

    pub fn load(symbol: &str, model_path: &Path, feature_count: usize) -> Result<Self, PredictionError> {
        if !model_path.exists() {
            return Err(PredictionError::ModelNotFound {
                symbol: symbol.to_string(),
                path: model_path.to_path_buf(),
            });
        }

        let load_error = |reason: String| PredictionError::ModelLoadError {
            symbol: symbol.to_string(),
            reason: format!("{:?}: {}", model_path, reason),
        };
        let file = File::open(model_path).map_err(|e| load_error(e.to_string()))?;
        let model: ForestModel =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| load_error(e.to_string()))?;

        info!("Loaded tabular model from {:?}", model_path);
        Ok(Self {
            model,
            feature_count,
            label: format!(
                "smartcore:{}",
                model_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("tree")
            ),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create model directory")?;
        }
        let content = serde_json::to_vec(&self.model).context("Failed to serialize model")?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content).context("Failed to write model temp file")?;
        fs::rename(&temp_path, path).context("Failed to rename model file")?;
        Ok(())
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }
}

impl TabularPredictor for SmartCoreTabularPredictor {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, PredictionError> {
        if let Some(bad) = rows.iter().find(|r| r.len() != self.feature_count) {
            return Err(PredictionError::FeatureMismatch {
                expected: self.feature_count,
                actual: bad.len(),
            });
        }
        let failure = |reason: String| PredictionError::InferenceFailed {
            model: self.label.clone(),
            reason,
        };

        let input_matrix = DenseMatrix::from_2d_vec(&rows.to_vec())
            .map_err(|e| failure(format!("Matrix creation failed: {}", e)))?;
        self.model
            .predict(&input_matrix)
            .map_err(|e| failure(format!("Prediction failed: {}", e)))
    }

    fn name(&self) -> &str {
        &self.label
    }
}
