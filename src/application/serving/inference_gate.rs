use crate::domain::errors::PredictionError;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Bounds concurrent model inference. With one permit, forward passes are
/// strictly serialized.
///
/// The permit moves into the blocking task, so a cancelled caller cannot
/// free it while its forward pass is still running.
#[derive(Clone)]
pub struct InferenceGate {
    permits: Arc<Semaphore>,
    size: usize,
    metrics: Option<Metrics>,
}

impl InferenceGate {
    pub fn new(permits: usize) -> Self {
        let size = permits.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on the blocking pool once a permit is free.
    ///
    /// The job counts as in flight from the moment it queues until it
    /// finishes, including when the caller stops waiting for it.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PredictionError>
    where
        F: FnOnce() -> Result<T, PredictionError> + Send + 'static,
        T: Send + 'static,
    {
        let in_flight = self.metrics.as_ref().map(|m| m.track_in_flight());

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| PredictionError::InferenceFailed {
                model: "gate".to_string(),
                reason: e.to_string(),
            })?;
        trace!("InferenceGate: permit acquired ({} left)", self.available());

        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.stage_timer("inference"));
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _timer = timer;
            let _in_flight = in_flight;
            job()
        });

        handle.await.map_err(|e| PredictionError::InferenceFailed {
            model: "gate".to_string(),
            reason: format!("inference task failed: {}", e),
        })?
    }
}
