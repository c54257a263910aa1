use crate::application::ml::aligner::TemporalAligner;
use crate::application::ml::ensemble::{EnsembleCombiner, HorizonModels};
use crate::application::ml::scaler::ReturnScaler;
use crate::application::ml::signals::{derive_forecast, headline, reasoning};
use crate::domain::errors::PredictionError;
use crate::domain::features::FeatureTable;
use crate::domain::horizon::Horizon;
use crate::domain::prediction::PredictionResult;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

/// Everything needed to forecast one symbol: fitted scaler, one model pair
/// per horizon and the blend weights. Read-only once built.
#[derive(Debug)]
pub struct PredictorBundle {
    symbol: String,
    scaler: ReturnScaler,
    models: HorizonModels,
    combiner: EnsembleCombiner,
}

impl PredictorBundle {
    pub fn new(
        symbol: impl Into<String>,
        scaler: ReturnScaler,
        models: HorizonModels,
        combiner: EnsembleCombiner,
    ) -> Result<Self, PredictionError> {
        if !scaler.is_fitted() {
            return Err(PredictionError::ScalerNotFitted { component: "bundle" });
        }
        Ok(Self {
            symbol: symbol.into(),
            scaler,
            models,
            combiner,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn horizons(&self) -> Vec<Horizon> {
        self.models.horizons()
    }

    pub fn scaler(&self) -> &ReturnScaler {
        &self.scaler
    }

    pub fn models(&self) -> &HorizonModels {
        &self.models
    }

    pub fn combiner(&self) -> &EnsembleCombiner {
        &self.combiner
    }

    /// Forecast every loaded horizon from the latest rows of `table`.
    ///
    /// The sequence window comes from the standardized table; the tabular
    /// row is built from raw values, matching how each model was trained.
    pub fn forecast(
        &self,
        aligner: &TemporalAligner,
        table: &FeatureTable,
    ) -> Result<PredictionResult, PredictionError> {
        let current_price = table
            .last_close()
            .ok_or_else(|| PredictionError::InsufficientHistory {
                symbol: self.symbol.clone(),
                required: aligner.min_inference_rows(),
                available: 0,
            })?;

        let scaled = self.scaler.transform_table(table)?;
        let window = aligner.latest_sequence(&scaled)?;
        let row = aligner.latest_tabular(table)?;

        let inputs: BTreeMap<Horizon, Vec<Vec<f64>>> = self
            .models
            .horizons()
            .into_iter()
            .map(|h| (h, vec![row.clone()]))
            .collect();
        let ensembles = self
            .combiner
            .predict(&self.models, &self.scaler, &[window], &inputs)?;

        let mut predictions = BTreeMap::new();
        for (horizon, out) in &ensembles {
            let (Some(ret), Some(conf)) = (out.ensemble.first(), out.confidence.first()) else {
                continue;
            };
            debug!(
                "[{}] {}: seq={:.5} tree={:.5} ens={:.5} conf={:.3}",
                self.symbol, horizon, out.sequence[0], out.tree[0], ret, conf
            );
            predictions.insert(*horizon, derive_forecast(*horizon, current_price, *ret, *conf));
        }

        if predictions.is_empty() {
            return Err(PredictionError::PredictionUnavailable {
                symbol: self.symbol.clone(),
                reason: "no horizon produced a forecast".to_string(),
            });
        }

        let (signal, overall_confidence) = headline(&predictions);
        Ok(PredictionResult {
            reasoning: reasoning(&self.symbol, &predictions),
            signal,
            overall_confidence,
            symbol: self.symbol.clone(),
            current_price,
            timestamp: Utc::now(),
            predictions,
        })
    }
}
