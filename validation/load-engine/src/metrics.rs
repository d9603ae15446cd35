//! Raw run data and the live metrics accumulator.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// One request's outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleRecord {
    /// Endpoint or scenario the request was issued for.
    pub target: String,
    pub latency_ms: f64,
    pub success: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub bytes: u64,
    /// When the request was issued, relative to run start.
    pub offset_ms: f64,
}

/// Process resource snapshot taken on a 1s tick.
///
/// `None` values mean the reading failed for that tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceSample {
    pub tick: u64,
    pub elapsed_secs: f64,
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
}

impl ResourceSample {
    pub fn is_absent(&self) -> bool {
        self.cpu_percent.is_none() && self.memory_mb.is_none()
    }
}

/// Point-in-time view of a run in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveStats {
    pub completed: u64,
    pub failed: u64,
    pub mean_latency_ms: f64,
    /// From the histogram sketch, so approximate.
    pub p95_latency_ms: f64,
}

impl LiveStats {
    pub fn error_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.failed as f64 / self.completed as f64
        }
    }
}

/// Collects samples during one run.
///
/// Exact samples are kept for final aggregation; the histogram only feeds
/// progress reporting. One collector per run, so nothing leaks between runs.
pub struct MetricsCollector {
    samples: Vec<SampleRecord>,
    histogram: Histogram<u64>,
    requests_success: u64,
    requests_failed: u64,
    latency_sum_ms: f64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            histogram: Histogram::new(3).expect("3 significant figures is a valid precision"),
            requests_success: 0,
            requests_failed: 0,
            latency_sum_ms: 0.0,
        }
    }

    /// Record a completed request, successful or not.
    pub fn record(&mut self, sample: SampleRecord) {
        if sample.success {
            self.requests_success += 1;
            self.latency_sum_ms += sample.latency_ms;
            self.histogram
                .record((sample.latency_ms * 1000.0) as u64)
                .ok();
        } else {
            self.requests_failed += 1;
        }
        self.samples.push(sample);
    }

    pub fn completed(&self) -> u64 {
        self.requests_success + self.requests_failed
    }

    pub fn live(&self) -> LiveStats {
        let mean_latency_ms = if self.requests_success > 0 {
            self.latency_sum_ms / self.requests_success as f64
        } else {
            0.0
        };
        let p95_latency_ms = if self.histogram.is_empty() {
            0.0
        } else {
            self.histogram.value_at_quantile(0.95) as f64 / 1000.0
        };

        LiveStats {
            completed: self.completed(),
            failed: self.requests_failed,
            mean_latency_ms,
            p95_latency_ms,
        }
    }

    /// Hand over the raw samples for aggregation.
    pub fn into_samples(self) -> Vec<SampleRecord> {
        self.samples
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
