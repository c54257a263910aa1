//! Serving metrics. Nothing here listens on a socket; callers decide where
//! the rendered text goes.

pub mod latency_tracker;
pub mod metrics;

pub use latency_tracker::{InFlightGuard, LatencyGuard};
pub use metrics::Metrics;
