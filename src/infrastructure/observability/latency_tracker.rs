//! Drop guards that keep gauges and histograms honest when a task is
//! cancelled or unwinds.

use prometheus::{Gauge, Histogram};
use std::time::Instant;

/// Records elapsed time into a histogram when dropped.
pub struct LatencyGuard {
    start: Instant,
    histogram: Histogram,
}

impl LatencyGuard {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }
}

impl Drop for LatencyGuard {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Holds one unit of a gauge until dropped.
pub struct InFlightGuard {
    gauge: Gauge,
}

impl InFlightGuard {
    pub fn new(gauge: Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
