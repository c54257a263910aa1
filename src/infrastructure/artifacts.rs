//! On-disk model artifacts, one directory per symbol:
//!
//! ```text
//! <model_dir>/<SYMBOL>/scaler.json
//! <model_dir>/<SYMBOL>/sequence_{1,7,30}d.onnx
//! <model_dir>/<SYMBOL>/tree_{1,7,30}d.json
//! <model_dir>/<SYMBOL>/ensemble_weights.json   (optional)
//! ```

use crate::application::ml::aligner::tabular_width;
use crate::application::ml::onnx_predictor::OnnxSequencePredictor;
use crate::application::ml::smartcore_predictor::SmartCoreTabularPredictor;
use crate::application::ml::{
    EnsembleCombiner, EnsembleWeights, HorizonModels, PredictorBundle, ReturnScaler,
};
use crate::application::serving::BundleLoader;
use crate::domain::errors::PredictionError;
use crate::domain::horizon::Horizon;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    model_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.model_dir.join(symbol.to_uppercase())
    }

    pub fn scaler(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("scaler.json")
    }

    pub fn sequence_model(&self, symbol: &str, horizon: Horizon) -> PathBuf {
        self.symbol_dir(symbol)
            .join(format!("sequence_{}.onnx", horizon.label()))
    }

    pub fn tree_model(&self, symbol: &str, horizon: Horizon) -> PathBuf {
        self.symbol_dir(symbol)
            .join(format!("tree_{}.json", horizon.label()))
    }

    pub fn weights(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("ensemble_weights.json")
    }
}

fn require(symbol: &str, path: &Path) -> Result<(), PredictionError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PredictionError::ModelNotFound {
            symbol: symbol.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Loads every horizon's model pair plus scaler and weights for a symbol.
pub struct FsBundleLoader {
    layout: ArtifactLayout,
    horizons: Vec<Horizon>,
}

impl FsBundleLoader {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self {
            layout,
            horizons: Horizon::ALL.to_vec(),
        }
    }
}

impl BundleLoader for FsBundleLoader {
    fn load(&self, symbol: &str) -> Result<PredictorBundle, PredictionError> {
        let symbol = symbol.to_uppercase();
        require(&symbol, &self.layout.symbol_dir(&symbol))?;

        let scaler_path = self.layout.scaler(&symbol);
        require(&symbol, &scaler_path)?;
        let scaler = ReturnScaler::load(&scaler_path).map_err(|e| PredictionError::ModelLoadError {
            symbol: symbol.clone(),
            reason: format!("{:#}", e),
        })?;
        let width = tabular_width(scaler.feature_names().len());

        let mut models = HorizonModels::new();
        for horizon in &self.horizons {
            let sequence = OnnxSequencePredictor::load(
                &symbol,
                &self.layout.sequence_model(&symbol, *horizon),
            )?;
            let tree = SmartCoreTabularPredictor::load(
                &symbol,
                &self.layout.tree_model(&symbol, *horizon),
                width,
            )?;
            models.insert(*horizon, Arc::new(sequence), Arc::new(tree));
        }

        let weights = EnsembleWeights::load_or_default(&self.layout.weights(&symbol)).map_err(|e| {
            PredictionError::ModelLoadError {
                symbol: symbol.clone(),
                reason: format!("{:#}", e),
            }
        })?;

        info!(
            "Loaded bundle for {} ({} horizons) from {:?}",
            symbol,
            models.horizons().len(),
            self.layout.symbol_dir(&symbol)
        );
        PredictorBundle::new(symbol, scaler, models, EnsembleCombiner::new(weights))
    }
}
