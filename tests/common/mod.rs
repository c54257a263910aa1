#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use finpredict::application::ml::{
    EnsembleCombiner, EnsembleWeights, HorizonModels, PredictorBundle, ReturnScaler, ScalerState,
};
use finpredict::application::serving::BundleLoader;
use finpredict::domain::errors::PredictionError;
use finpredict::domain::features::{FeatureRow, FeatureTable};
use finpredict::domain::horizon::Horizon;
use finpredict::domain::ml::SequenceWindow;
use finpredict::domain::ports::{FeatureStore, MarketDataSource, SequencePredictor, TabularPredictor};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Wall-clock (start, end) of each forward pass.
pub type Spans = Arc<Mutex<Vec<(Instant, Instant)>>>;

pub const FEATURES: [&str; 2] = ["rsi_14", "volume_z"];

/// Returns the same value for every window, counting calls and recording
/// when each one ran.
pub struct ConstSequence {
    pub value: f64,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub spans: Spans,
}

impl ConstSequence {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SequencePredictor for ConstSequence {
    fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>, PredictionError> {
        let start = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.spans.lock().unwrap().push((start, Instant::now()));
        Ok(vec![self.value; windows.len()])
    }

    fn name(&self) -> &str {
        "const-sequence"
    }
}

pub struct ConstTree {
    pub value: f64,
}

impl TabularPredictor for ConstTree {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, PredictionError> {
        Ok(vec![self.value; rows.len()])
    }

    fn name(&self) -> &str {
        "const-tree"
    }
}

/// Scaler with zero means and unit scales: standardized == raw.
pub fn identity_scaler() -> ReturnScaler {
    ReturnScaler::from_state(ScalerState {
        feature_names: FEATURES.iter().map(|s| s.to_string()).collect(),
        feature_mean: vec![0.0; FEATURES.len()],
        feature_scale: vec![1.0; FEATURES.len()],
        target_mean: 0.0,
        target_scale: 1.0,
    })
    .unwrap()
}

/// Deterministic table whose last close is `last_close`.
pub fn feature_table(symbol: &str, rows: usize, last_close: f64) -> FeatureTable {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let returns: Vec<f64> = (0..rows)
        .map(|i| ((i as f64) * 0.37).sin() * 0.01 + 0.0004)
        .collect();
    // Walk closes backwards so the final close is exact
    let mut closes = vec![last_close; rows];
    for i in (0..rows.saturating_sub(1)).rev() {
        closes[i] = closes[i + 1] / returns[i + 1].exp();
    }
    let rows = (0..rows)
        .map(|i| FeatureRow {
            date: start + ChronoDuration::days(i as i64),
            close: closes[i],
            features: vec![50.0 + ((i as f64) * 0.2).cos() * 10.0, ((i % 9) as f64) - 4.0],
            log_return: returns[i],
        })
        .collect();
    FeatureTable::new(
        symbol,
        FEATURES.iter().map(|s| s.to_string()).collect(),
        rows,
    )
    .unwrap()
}

/// Per-horizon model outputs (sequence in standardized units).
#[derive(Clone, Copy)]
pub struct Outputs {
    pub sequence: f64,
    pub tree: f64,
}

/// In-memory bundle loader with load counting and scripted failures.
pub struct MockLoader {
    pub loads: Arc<AtomicUsize>,
    /// Loads running right now, and the most ever seen at once.
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub inference_calls: Arc<AtomicUsize>,
    pub inference_delay: Duration,
    pub spans: Spans,
    pub delay: Duration,
    pub missing: HashSet<String>,
    /// Symbols that fail this many times before loading.
    pub failures: Mutex<HashMap<String, usize>>,
    pub outputs: BTreeMap<Horizon, Outputs>,
}

impl MockLoader {
    pub fn new() -> Self {
        let outputs = Horizon::ALL
            .iter()
            .map(|h| {
                (
                    *h,
                    Outputs {
                        sequence: 0.01,
                        tree: 0.01,
                    },
                )
            })
            .collect();
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            inference_calls: Arc::new(AtomicUsize::new(0)),
            inference_delay: Duration::ZERO,
            spans: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            missing: HashSet::new(),
            failures: Mutex::new(HashMap::new()),
            outputs,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Each forward pass sleeps this long.
    pub fn with_inference_delay(mut self, delay: Duration) -> Self {
        self.inference_delay = delay;
        self
    }

    pub fn with_missing(mut self, symbol: &str) -> Self {
        self.missing.insert(symbol.to_string());
        self
    }

    pub fn with_failures(self, symbol: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(symbol.to_string(), times);
        self
    }

    pub fn with_outputs(mut self, horizon: Horizon, sequence: f64, tree: f64) -> Self {
        self.outputs.insert(horizon, Outputs { sequence, tree });
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_loads(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn recorded_spans(&self) -> Vec<(Instant, Instant)> {
        self.spans.lock().unwrap().clone()
    }

    fn load_inner(&self, symbol: &str) -> Result<PredictorBundle, PredictionError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if self.missing.contains(symbol) {
            return Err(PredictionError::ModelNotFound {
                symbol: symbol.to_string(),
                path: PathBuf::from(format!("/models/{}", symbol)),
            });
        }
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(symbol) {
                if *left > 0 {
                    *left -= 1;
                    return Err(PredictionError::ModelLoadError {
                        symbol: symbol.to_string(),
                        reason: "corrupt artifact".to_string(),
                    });
                }
            }
        }

        let mut models = HorizonModels::new();
        for (horizon, out) in &self.outputs {
            models.insert(
                *horizon,
                Arc::new(ConstSequence {
                    value: out.sequence,
                    calls: Arc::clone(&self.inference_calls),
                    delay: self.inference_delay,
                    spans: Arc::clone(&self.spans),
                }),
                Arc::new(ConstTree { value: out.tree }),
            );
        }
        PredictorBundle::new(
            symbol,
            identity_scaler(),
            models,
            EnsembleCombiner::new(EnsembleWeights::default()),
        )
    }
}

impl BundleLoader for MockLoader {
    fn load(&self, symbol: &str) -> Result<PredictorBundle, PredictionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let outcome = self.load_inner(symbol);
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Feature store over prebuilt tables.
#[derive(Default)]
pub struct MemoryFeatureStore {
    pub tables: HashMap<String, FeatureTable>,
}

impl MemoryFeatureStore {
    pub fn with(mut self, table: FeatureTable) -> Self {
        self.tables.insert(table.symbol().to_string(), table);
        self
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn load_features(&self, symbol: &str) -> Result<FeatureTable, PredictionError> {
        self.tables
            .get(symbol)
            .cloned()
            .ok_or_else(|| PredictionError::InsufficientHistory {
                symbol: symbol.to_string(),
                required: 1,
                available: 0,
            })
    }
}

/// Live source that always fails or stalls.
pub struct BrokenMarketData {
    pub stall: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MarketDataSource for BrokenMarketData {
    async fn fetch_features(&self, symbol: &str) -> anyhow::Result<FeatureTable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        anyhow::bail!("upstream unavailable for {}", symbol)
    }
}
