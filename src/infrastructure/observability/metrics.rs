//! Prometheus metrics for the prediction serving path.
//!
//! All metrics use the `finpredict_` prefix and live in a private registry.

use crate::infrastructure::observability::{InFlightGuard, LatencyGuard};
use prometheus::{
    Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Model cache lookups by result (hit, miss)
    pub model_cache_requests_total: CounterVec,
    /// Bundle loads by outcome (success, not_found, error)
    pub model_loads_total: CounterVec,
    /// Bundles evicted to make room
    pub model_evictions_total: Counter,
    /// Bundles currently resident
    pub model_cache_resident: Gauge,
    /// Result cache lookups by result (hit, miss, error)
    pub result_cache_requests_total: CounterVec,
    /// Inference calls waiting for or holding the gate
    pub inference_in_flight: Gauge,
    /// Time spent per stage (features, inference)
    pub stage_latency_seconds: HistogramVec,
    /// Served predictions by outcome
    pub predictions_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let model_cache_requests_total = CounterVec::new(
            Opts::new(
                "finpredict_model_cache_requests_total",
                "Model cache lookups by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(model_cache_requests_total.clone()))?;

        let model_loads_total = CounterVec::new(
            Opts::new("finpredict_model_loads_total", "Model bundle loads by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(model_loads_total.clone()))?;

        let model_evictions_total = Counter::with_opts(Opts::new(
            "finpredict_model_evictions_total",
            "Model bundles evicted from the cache",
        ))?;
        registry.register(Box::new(model_evictions_total.clone()))?;

        let model_cache_resident = Gauge::with_opts(Opts::new(
            "finpredict_model_cache_resident",
            "Model bundles currently resident",
        ))?;
        registry.register(Box::new(model_cache_resident.clone()))?;

        let result_cache_requests_total = CounterVec::new(
            Opts::new(
                "finpredict_result_cache_requests_total",
                "Result cache lookups by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(result_cache_requests_total.clone()))?;

        let inference_in_flight = Gauge::with_opts(Opts::new(
            "finpredict_inference_in_flight",
            "Inference calls queued at or inside the gate",
        ))?;
        registry.register(Box::new(inference_in_flight.clone()))?;

        let stage_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "finpredict_stage_latency_seconds",
                "Serving stage latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["stage"],
        )?;
        registry.register(Box::new(stage_latency_seconds.clone()))?;

        let predictions_total = CounterVec::new(
            Opts::new("finpredict_predictions_total", "Served predictions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(predictions_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            model_cache_requests_total,
            model_loads_total,
            model_evictions_total,
            model_cache_resident,
            result_cache_requests_total,
            inference_in_flight,
            stage_latency_seconds,
            predictions_total,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn model_cache_hit(&self) {
        self.model_cache_requests_total.with_label_values(&["hit"]).inc();
    }

    pub fn model_cache_miss(&self) {
        self.model_cache_requests_total.with_label_values(&["miss"]).inc();
    }

    pub fn inc_loads(&self, outcome: &str) {
        self.model_loads_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_result_cache(&self, result: &str) {
        self.result_cache_requests_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn inc_predictions(&self, outcome: &str) {
        self.predictions_total.with_label_values(&[outcome]).inc();
    }

    pub fn stage_timer(&self, stage: &str) -> LatencyGuard {
        LatencyGuard::new(self.stage_latency_seconds.with_label_values(&[stage]))
    }

    /// Counts one inference job as in flight until the guard drops.
    pub fn track_in_flight(&self) -> InFlightGuard {
        InFlightGuard::new(self.inference_in_flight.clone())
    }
}
