//! Result aggregation shared by every run mode.
//!
//! Everything here is a pure function of its inputs: aggregating the same
//! samples twice yields identical results. Latency statistics cover
//! successful requests; counts and error rate cover all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Thresholds;
use crate::metrics::{ResourceSample, SampleRecord};

/// Latency summary in milliseconds. All zero for an empty set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    pub fn from_latencies(latencies: &[f64]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        let mut sorted = latencies.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mean_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Self {
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            mean_ms,
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
            p99_ms: percentile(&sorted, 99),
        }
    }
}

/// Value at the `ceil(pct/100 * N)`-th position of an ascending slice.
///
/// The rank is computed in integers so `0.95 * 20` cannot round to 20.
pub fn percentile(sorted: &[f64], pct: u32) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (pct.min(100) as usize * n + 99) / 100;
    sorted[rank.clamp(1, n) - 1]
}

/// Counts and latency for any subset of samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub latency: LatencyStats,
}

pub fn summarize<'a>(samples: impl IntoIterator<Item = &'a SampleRecord>) -> RequestSummary {
    let mut total = 0u64;
    let mut failed = 0u64;
    let mut latencies = Vec::new();

    for sample in samples {
        total += 1;
        if sample.success {
            latencies.push(sample.latency_ms);
        } else {
            failed += 1;
        }
    }

    RequestSummary {
        total_requests: total,
        successful_requests: total - failed,
        failed_requests: failed,
        error_rate: if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        },
        latency: LatencyStats::from_latencies(&latencies),
    }
}

/// Per-target summaries keyed by endpoint or scenario id.
pub fn summarize_by_target(samples: &[SampleRecord]) -> BTreeMap<String, RequestSummary> {
    let mut groups: BTreeMap<String, Vec<&SampleRecord>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.target.clone()).or_default().push(sample);
    }
    groups
        .into_iter()
        .map(|(target, group)| (target, summarize(group)))
        .collect()
}

/// A threshold a finished result exceeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdViolation {
    MeanLatency { actual_ms: f64, limit_ms: f64 },
    P95Latency { actual_ms: f64, limit_ms: f64 },
    ErrorRate { actual: f64, limit: f64 },
    CpuUsage { actual_percent: f64, limit_percent: f64 },
    MemoryUsage { actual_mb: f64, limit_mb: f64 },
}

impl std::fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdViolation::MeanLatency {
                actual_ms,
                limit_ms,
            } => write!(f, "mean latency {:.1}ms > {:.1}ms", actual_ms, limit_ms),
            ThresholdViolation::P95Latency {
                actual_ms,
                limit_ms,
            } => write!(f, "p95 latency {:.1}ms > {:.1}ms", actual_ms, limit_ms),
            ThresholdViolation::ErrorRate { actual, limit } => {
                write!(f, "error rate {:.3} > {:.3}", actual, limit)
            }
            ThresholdViolation::CpuUsage {
                actual_percent,
                limit_percent,
            } => write!(f, "cpu {:.1}% > {:.1}%", actual_percent, limit_percent),
            ThresholdViolation::MemoryUsage {
                actual_mb,
                limit_mb,
            } => write!(f, "memory {:.1}MB > {:.1}MB", actual_mb, limit_mb),
        }
    }
}

/// Summary of one bounded-duration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    /// Completed requests per configured second.
    pub throughput: f64,
    pub latency: LatencyStats,
    pub bytes_received: u64,
    pub resource_usage: Vec<ResourceSample>,
    pub peak_cpu_percent: Option<f64>,
    pub peak_memory_mb: Option<f64>,
    pub violations: Vec<ThresholdViolation>,
    pub passed: bool,
}

/// Aggregate one run window.
pub fn aggregate(
    name: &str,
    started_at: DateTime<Utc>,
    duration: Duration,
    samples: &[SampleRecord],
    resource_usage: Vec<ResourceSample>,
    thresholds: &Thresholds,
) -> TestResult {
    let summary = summarize(samples);
    let duration_secs = duration.as_secs_f64();
    let throughput = if duration_secs > 0.0 {
        summary.total_requests as f64 / duration_secs
    } else {
        0.0
    };
    let violations = evaluate_thresholds(&summary, thresholds);

    TestResult {
        name: name.to_string(),
        started_at,
        duration_secs,
        total_requests: summary.total_requests,
        successful_requests: summary.successful_requests,
        failed_requests: summary.failed_requests,
        error_rate: summary.error_rate,
        throughput,
        latency: summary.latency,
        bytes_received: samples.iter().map(|s| s.bytes).sum(),
        peak_cpu_percent: peak(resource_usage.iter().filter_map(|r| r.cpu_percent)),
        peak_memory_mb: peak(resource_usage.iter().filter_map(|r| r.memory_mb)),
        resource_usage,
        passed: violations.is_empty(),
        violations,
    }
}

/// Check a summary against latency and error-rate ceilings.
pub fn evaluate_thresholds(
    summary: &RequestSummary,
    thresholds: &Thresholds,
) -> Vec<ThresholdViolation> {
    let mut violations = Vec::new();
    if summary.latency.mean_ms > thresholds.response_time_ms {
        violations.push(ThresholdViolation::MeanLatency {
            actual_ms: summary.latency.mean_ms,
            limit_ms: thresholds.response_time_ms,
        });
    }
    if summary.latency.p95_ms > thresholds.p95_ms {
        violations.push(ThresholdViolation::P95Latency {
            actual_ms: summary.latency.p95_ms,
            limit_ms: thresholds.p95_ms,
        });
    }
    if summary.error_rate > thresholds.error_rate {
        violations.push(ThresholdViolation::ErrorRate {
            actual: summary.error_rate,
            limit: thresholds.error_rate,
        });
    }
    violations
}

fn peak(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}
