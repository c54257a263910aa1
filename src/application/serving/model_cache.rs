//! Bounded LRU cache of loaded predictor bundles.
//!
//! At most one load runs per symbol. Concurrent cold requests queue on a
//! per-symbol lock and re-check residency once they hold it. Loads run on the
//! blocking pool and complete (and populate the cache) even when every
//! caller waiting on them has gone away. A load that was started before an
//! evict or clear of its symbol still answers its callers but is not made
//! resident.

use crate::application::ml::PredictorBundle;
use crate::application::serving::generation::{Generations, Stamp};
use crate::domain::errors::PredictionError;
use crate::infrastructure::observability::Metrics;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Builds a bundle from persisted artifacts. Called from the blocking pool.
pub trait BundleLoader: Send + Sync {
    fn load(&self, symbol: &str) -> Result<PredictorBundle, PredictionError>;
}

#[derive(Default)]
struct CacheTable {
    bundles: HashMap<String, Arc<PredictorBundle>>,
    /// Least recently used first.
    order: VecDeque<String>,
    loading: HashMap<String, LoadLock>,
    generations: Generations,
}

type LoadLock = Arc<tokio::sync::Mutex<()>>;

impl CacheTable {
    fn touch(&mut self, symbol: &str) {
        if let Some(pos) = self.order.iter().position(|s| s == symbol) {
            self.order.remove(pos);
        }
        self.order.push_back(symbol.to_string());
    }

    fn remove(&mut self, symbol: &str) -> bool {
        self.order.retain(|s| s != symbol);
        self.bundles.remove(symbol).is_some()
    }
}

struct Shared {
    capacity: usize,
    table: Mutex<CacheTable>,
    metrics: Option<Metrics>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, CacheTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Residency check made by a caller holding the symbol's load lock.
    /// On a miss, returns the generation the load starts from.
    fn lookup_or_stamp(&self, symbol: &str) -> Result<Arc<PredictorBundle>, Stamp> {
        let mut table = self.table();
        match table.bundles.get(symbol).cloned() {
            Some(bundle) => {
                table.touch(symbol);
                Ok(bundle)
            }
            None => Err(table.generations.stamp(symbol)),
        }
    }

    /// Insert, evicting least recently used bundles while full. Returns false
    /// without inserting when the symbol was invalidated after `stamp`.
    fn insert(&self, symbol: &str, bundle: Arc<PredictorBundle>, stamp: Stamp) -> bool {
        let mut table = self.table();
        if !table.generations.is_current(symbol, stamp) {
            return false;
        }
        while !table.bundles.contains_key(symbol) && table.bundles.len() >= self.capacity {
            let Some(victim) = table.order.pop_front() else {
                break;
            };
            table.bundles.remove(&victim);
            info!("ModelCache: evicted {} (capacity {})", victim, self.capacity);
            if let Some(m) = &self.metrics {
                m.model_evictions_total.inc();
            }
        }
        table.bundles.insert(symbol.to_string(), bundle);
        table.touch(symbol);
        if let Some(m) = &self.metrics {
            m.model_cache_resident.set(table.bundles.len() as f64);
        }
        true
    }

    /// Drop the symbol's lock entry once no other caller holds or awaits it.
    ///
    /// New waiters only clone the lock under the table mutex, so a count of
    /// two (the map plus `lock`) cannot grow while it is checked here.
    fn release_load_lock(&self, symbol: &str, lock: &LoadLock) {
        let mut table = self.table();
        let idle = table
            .loading
            .get(symbol)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) <= 2);
        if idle {
            table.loading.remove(symbol);
        }
    }
}

pub struct ModelCache {
    loader: Arc<dyn BundleLoader>,
    shared: Arc<Shared>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn BundleLoader>, capacity: usize) -> Self {
        Self::build(loader, capacity, None)
    }

    pub fn with_metrics(loader: Arc<dyn BundleLoader>, capacity: usize, metrics: Metrics) -> Self {
        Self::build(loader, capacity, Some(metrics))
    }

    fn build(loader: Arc<dyn BundleLoader>, capacity: usize, metrics: Option<Metrics>) -> Self {
        Self {
            loader,
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                table: Mutex::new(CacheTable::default()),
                metrics,
            }),
        }
    }

    /// Resident bundle for `symbol`, loading it on a miss.
    ///
    /// Failed loads are not cached; the next call retries.
    pub async fn get(&self, symbol: &str) -> Result<Arc<PredictorBundle>, PredictionError> {
        let symbol = symbol.to_uppercase();

        let load_lock = {
            let mut table = self.shared.table();
            if let Some(bundle) = table.bundles.get(&symbol).cloned() {
                table.touch(&symbol);
                self.record(|m| m.model_cache_hit());
                debug!("ModelCache: hit for {}", symbol);
                return Ok(bundle);
            }
            table
                .loading
                .entry(symbol.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let guard = Arc::clone(&load_lock).lock_owned().await;

        // Another caller may have finished the load while we queued
        let stamp = match self.shared.lookup_or_stamp(&symbol) {
            Ok(bundle) => {
                drop(guard);
                self.shared.release_load_lock(&symbol, &load_lock);
                self.record(|m| m.model_cache_hit());
                return Ok(bundle);
            }
            Err(stamp) => stamp,
        };
        self.record(|m| m.model_cache_miss());

        let loader = Arc::clone(&self.loader);
        let shared = Arc::clone(&self.shared);
        let task_symbol = symbol.clone();
        let handle = tokio::task::spawn_blocking(move || {
            info!("ModelCache: loading bundle for {}", task_symbol);
            let outcome = loader.load(&task_symbol);
            let outcome = match outcome {
                Ok(bundle) => {
                    let bundle = Arc::new(bundle);
                    if !shared.insert(&task_symbol, Arc::clone(&bundle), stamp) {
                        debug!(
                            "ModelCache: {} invalidated during load; not caching",
                            task_symbol
                        );
                    }
                    if let Some(m) = &shared.metrics {
                        m.inc_loads("success");
                    }
                    Ok(bundle)
                }
                Err(e) => {
                    if let Some(m) = &shared.metrics {
                        m.inc_loads(if e.is_not_found() { "not_found" } else { "error" });
                    }
                    if e.is_not_found() {
                        warn!("ModelCache: no artifacts for {}: {}", task_symbol, e);
                    } else {
                        error!("ModelCache: failed to load {}: {}", task_symbol, e);
                    }
                    Err(e)
                }
            };
            drop(guard);
            shared.release_load_lock(&task_symbol, &load_lock);
            outcome
        });

        handle.await.map_err(|e| PredictionError::ModelLoadError {
            symbol,
            reason: format!("load task failed: {}", e),
        })?
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.shared
            .table()
            .bundles
            .contains_key(&symbol.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.shared.table().bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident symbols, least recently used first.
    pub fn resident(&self) -> Vec<String> {
        self.shared.table().order.iter().cloned().collect()
    }

    /// Drop one bundle. In-flight callers keep their `Arc` until they finish;
    /// a load already running for the symbol will not be made resident.
    pub fn evict(&self, symbol: &str) -> bool {
        let symbol = symbol.to_uppercase();
        let removed = {
            let mut table = self.shared.table();
            table.generations.bump(&symbol);
            table.remove(&symbol)
        };
        if removed {
            info!("ModelCache: dropped {}", symbol);
            self.update_resident();
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let removed = {
            let mut table = self.shared.table();
            let n = table.bundles.len();
            table.generations.bump_all();
            table.bundles.clear();
            table.order.clear();
            n
        };
        info!("ModelCache: cleared {} bundles", removed);
        self.update_resident();
        removed
    }

    fn update_resident(&self) {
        let len = self.len();
        self.record(|m| m.model_cache_resident.set(len as f64));
    }

    fn record(&self, f: impl FnOnce(&Metrics)) {
        if let Some(m) = &self.shared.metrics {
            f(m);
        }
    }
}
