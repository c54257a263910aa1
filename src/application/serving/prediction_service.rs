//! Request path: result cache, model cache, feature acquisition, gated
//! inference, write-back.
//!
//! A cache miss is computed on a detached task. The result reaches the
//! result store even if the requesting caller has gone away, unless the
//! symbol was invalidated while it was being computed.

use crate::application::ml::TemporalAligner;
use crate::application::serving::generation::{SharedGenerations, Stamp};
use crate::application::serving::inference_gate::InferenceGate;
use crate::application::serving::model_cache::ModelCache;
use crate::domain::errors::PredictionError;
use crate::domain::features::FeatureTable;
use crate::domain::ports::{FeatureStore, MarketDataSource, ResultStore};
use crate::domain::prediction::PredictionResult;
use crate::infrastructure::observability::Metrics;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RESULT_KEY_PREFIX: &str = "prediction:";

pub fn result_key(symbol: &str) -> String {
    format!("{}{}", RESULT_KEY_PREFIX, symbol.to_uppercase())
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub inference_permits: usize,
    pub result_ttl: Duration,
    pub market_data_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            inference_permits: 1,
            result_ttl: Duration::from_secs(300),
            market_data_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct PredictionService {
    models: Arc<ModelCache>,
    generations: Arc<SharedGenerations>,
    gate: InferenceGate,
    aligner: TemporalAligner,
    features: Arc<dyn FeatureStore>,
    market_data: Option<Arc<dyn MarketDataSource>>,
    results: Arc<dyn ResultStore>,
    settings: ServiceSettings,
    metrics: Option<Metrics>,
}

impl PredictionService {
    pub fn new(
        models: Arc<ModelCache>,
        aligner: TemporalAligner,
        features: Arc<dyn FeatureStore>,
        results: Arc<dyn ResultStore>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            models,
            generations: Arc::new(SharedGenerations::default()),
            gate: InferenceGate::new(settings.inference_permits),
            aligner,
            features,
            market_data: None,
            results,
            settings,
            metrics: None,
        }
    }

    /// Prefer live features, falling back to the feature store.
    pub fn with_market_data(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        self.market_data = Some(source);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.gate = self.gate.clone().with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn model_cache(&self) -> &ModelCache {
        &self.models
    }

    pub fn gate(&self) -> &InferenceGate {
        &self.gate
    }

    /// Multi-horizon forecast for `symbol`, served from the result cache
    /// while fresh.
    pub async fn predict(&self, symbol: &str) -> Result<PredictionResult, PredictionError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(PredictionError::PredictionUnavailable {
                symbol,
                reason: "empty symbol".to_string(),
            });
        }
        let key = result_key(&symbol);

        if let Some(cached) = self.cached(&key).await {
            return Ok(cached);
        }

        let stamp = self.generations.stamp(&symbol);
        let service = self.clone();
        let task_symbol = symbol.clone();
        let handle = tokio::spawn(async move {
            let outcome = service.compute(&task_symbol).await;
            service.record(|m| {
                m.inc_predictions(if outcome.is_ok() { "computed" } else { "failed" })
            });
            let result = outcome?;
            service.write_back(&task_symbol, &result, stamp).await;
            Ok::<_, PredictionError>(result)
        });

        handle
            .await
            .map_err(|e| PredictionError::PredictionUnavailable {
                symbol,
                reason: format!("prediction task failed: {}", e),
            })?
    }

    /// Cache `result` unless `symbol` was invalidated after `stamp`.
    async fn write_back(&self, symbol: &str, result: &PredictionResult, stamp: Stamp) {
        if !self.generations.is_current(symbol, stamp) {
            debug!("{} invalidated during computation; not caching", symbol);
            return;
        }
        let key = result_key(symbol);
        match result.to_json_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.results.set(&key, bytes, self.settings.result_ttl).await {
                    warn!("Result cache write failed for {}: {:#}", key, e);
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to serialize prediction for {}: {}", symbol, e);
                return;
            }
        }

        // An invalidation that raced the write must still win
        if !self.generations.is_current(symbol, stamp) {
            debug!("{} invalidated during write-back; removing", symbol);
            if let Err(e) = self.results.delete(&[key.clone()]).await {
                warn!("Failed to drop stale prediction {}: {:#}", key, e);
            }
        }
    }

    async fn cached(&self, key: &str) -> Option<PredictionResult> {
        match self.results.get(key).await {
            Ok(Some(bytes)) => match PredictionResult::from_json_bytes(&bytes) {
                Ok(result) => {
                    debug!("Result cache hit for {}", key);
                    self.record(|m| m.inc_result_cache("hit"));
                    Some(result)
                }
                Err(e) => {
                    warn!("Discarding unreadable cached prediction {}: {}", key, e);
                    self.record(|m| m.inc_result_cache("error"));
                    None
                }
            },
            Ok(None) => {
                self.record(|m| m.inc_result_cache("miss"));
                None
            }
            Err(e) => {
                warn!("Result cache read failed for {}: {:#}", key, e);
                self.record(|m| m.inc_result_cache("error"));
                None
            }
        }
    }

    async fn compute(&self, symbol: &str) -> Result<PredictionResult, PredictionError> {
        let bundle = self.models.get(symbol).await?;
        let table = self.load_features(symbol).await?;

        let aligner = self.aligner.clone();
        self.gate
            .run(move || bundle.forecast(&aligner, &table))
            .await
    }

    async fn load_features(&self, symbol: &str) -> Result<FeatureTable, PredictionError> {
        let _timer = self.metrics.as_ref().map(|m| m.stage_timer("features"));
        let required = self.aligner.min_inference_rows();

        let live_failure = match &self.market_data {
            Some(source) => {
                match tokio::time::timeout(
                    self.settings.market_data_timeout,
                    source.fetch_features(symbol),
                )
                .await
                {
                    Ok(Ok(table)) if table.len() >= required => return Ok(table),
                    Ok(Ok(table)) => Some(format!(
                        "live source returned {} rows, need {}",
                        table.len(),
                        required
                    )),
                    Ok(Err(e)) => Some(format!("live fetch failed: {:#}", e)),
                    Err(_) => Some(format!(
                        "live fetch timed out after {:?}",
                        self.settings.market_data_timeout
                    )),
                }
            }
            None => None,
        };
        if let Some(reason) = &live_failure {
            warn!("{}: {}; using stored features", symbol, reason);
        }

        let store = Arc::clone(&self.features);
        let owned_symbol = symbol.to_string();
        let stored = tokio::task::spawn_blocking(move || store.load_features(&owned_symbol))
            .await
            .map_err(|e| PredictionError::PredictionUnavailable {
                symbol: symbol.to_string(),
                reason: format!("feature load task failed: {}", e),
            })?;

        match stored {
            Ok(table) if table.len() >= required => Ok(table),
            Ok(table) => Err(PredictionError::InsufficientHistory {
                symbol: symbol.to_string(),
                required,
                available: table.len(),
            }),
            Err(e @ PredictionError::InsufficientHistory { .. }) if live_failure.is_none() => Err(e),
            Err(e) => Err(PredictionError::PredictionUnavailable {
                symbol: symbol.to_string(),
                reason: match live_failure {
                    Some(live) => format!("{}; stored features: {}", live, e),
                    None => e.to_string(),
                },
            }),
        }
    }

    /// Clear cached results for one symbol, or all with `"*"`, and drop the
    /// matching model bundles so retrained artifacts are picked up.
    ///
    /// Forecasts already in flight for the symbol finish for their callers
    /// but are not written back.
    pub async fn invalidate(&self, symbol: &str) -> Result<usize, PredictionError> {
        let symbol = symbol.trim();
        let keys = if symbol == "*" {
            self.generations.bump_all();
            self.models.clear();
            self.results
                .keys(&format!("{}*", RESULT_KEY_PREFIX))
                .await
                .map_err(|e| Self::store_error("*", e))?
        } else {
            self.generations.bump(&symbol.to_uppercase());
            self.models.evict(symbol);
            vec![result_key(symbol)]
        };

        let removed = self
            .results
            .delete(&keys)
            .await
            .map_err(|e| Self::store_error(symbol, e))?;
        info!("Invalidated {} cached predictions for {}", removed, symbol);
        Ok(removed)
    }

    /// Clear every cached prediction. Loaded model bundles stay resident.
    pub async fn refresh(&self) -> Result<usize, PredictionError> {
        self.generations.bump_all();
        let keys = self
            .results
            .keys(&format!("{}*", RESULT_KEY_PREFIX))
            .await
            .map_err(|e| Self::store_error("*", e))?;
        let removed = self
            .results
            .delete(&keys)
            .await
            .map_err(|e| Self::store_error("*", e))?;
        info!("Refresh cleared {} cached predictions", removed);
        Ok(removed)
    }

    /// Warm the model cache concurrently. Failures are logged and skipped.
    pub async fn preload(&self, symbols: &[String]) -> usize {
        let outcomes = join_all(symbols.iter().map(|s| self.models.get(s))).await;
        let mut loaded = 0;
        for (symbol, outcome) in symbols.iter().zip(outcomes) {
            match outcome {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Preload skipped {}: {}", symbol, e),
            }
        }
        info!("Preloaded {}/{} model bundles", loaded, symbols.len());
        loaded
    }

    fn store_error(symbol: &str, e: anyhow::Error) -> PredictionError {
        PredictionError::PredictionUnavailable {
            symbol: symbol.to_string(),
            reason: format!("result store: {:#}", e),
        }
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        if let Some(m) = &self.metrics {
            f(m);
        }
    }
}
