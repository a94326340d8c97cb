//! In-memory latency histogram for query instrumentation.
//! Records wall time of each facade query served over HTTP.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. API handlers record and read.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<Option<hdrhistogram::Histogram<u64>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

impl LatencyStats {
    /// Create a new histogram. Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3).ok()),
        }
    }

    /// Record a query latency in microseconds. Out-of-range samples are dropped.
    pub fn record_us(&self, us: u64) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(h) = guard.as_mut() {
            let _ = h.record(us.max(1));
        }
    }

    /// Record from a std::time::Duration.
    pub fn record(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.record_us(us);
    }

    pub fn summary(&self) -> LatencySummary {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(h) if h.len() > 0 => LatencySummary {
                samples: h.len(),
                p50_us: Some(h.value_at_quantile(0.5)),
                p95_us: Some(h.value_at_quantile(0.95)),
                p99_us: Some(h.value_at_quantile(0.99)),
            },
            _ => LatencySummary { samples: 0, p50_us: None, p95_us: None, p99_us: None },
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
