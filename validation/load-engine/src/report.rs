//! Report persistence and console formatting.

use chrono::Utc;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aggregate::TestResult;
use crate::error::ReportError;
use crate::stress::StressTestResult;
use crate::users::LoadTestResult;

/// Attempts at finding an unused key before giving up.
const MAX_KEY_ATTEMPTS: i64 = 1000;

/// A finished result that can be persisted.
pub trait Report: Serialize {
    /// Leading component of the report file name.
    const PREFIX: &'static str;

    fn test_name(&self) -> &str;
}

impl Report for TestResult {
    const PREFIX: &'static str = "performance";

    fn test_name(&self) -> &str {
        &self.name
    }
}

impl Report for LoadTestResult {
    const PREFIX: &'static str = "load";

    fn test_name(&self) -> &str {
        &self.summary.name
    }
}

impl Report for StressTestResult {
    const PREFIX: &'static str = "stress";

    fn test_name(&self) -> &str {
        &self.name
    }
}

/// `<prefix>-<testName>-<epochMillis>.json` with the name made path-safe.
pub fn report_key(prefix: &str, test_name: &str, epoch_millis: i64) -> String {
    let name: String = test_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}-{}.json", prefix, name, epoch_millis)
}

/// Writes one JSON document per report into a directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist a report, returning the path written.
    ///
    /// Existing files are never replaced: if the key is taken the timestamp
    /// is bumped a millisecond at a time.
    pub fn write<R: Report>(&self, report: &R) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ReportError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })?;

        let body = serde_json::to_vec_pretty(report)?;
        let base_millis = Utc::now().timestamp_millis();

        for attempt in 0..MAX_KEY_ATTEMPTS {
            let key = report_key(R::PREFIX, report.test_name(), base_millis + attempt);
            let path = self.output_dir.join(key);

            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ReportError::Write { path, source }),
            };

            if let Err(source) = write_or_discard(&path, file, &body) {
                return Err(ReportError::Write { path, source });
            }

            info!(path = %path.display(), "Report written");
            return Ok(path);
        }

        Err(ReportError::KeyExhausted(report.test_name().to_string()))
    }
}

/// Write `body` through `file`, removing `path` if the write fails part way.
fn write_or_discard<W: Write>(path: &Path, mut file: W, body: &[u8]) -> std::io::Result<()> {
    let result = file.write_all(body).and_then(|_| file.flush());
    if let Err(e) = &result {
        warn!(path = %path.display(), error = %e, "Report write failed");
        drop(file);
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Could not remove partial report");
        }
    }
    result
}

/// Formats results for console output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format a single run as a console table.
    pub fn format_table(results: &TestResult) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.name)]);

        Self::summary_rows(&mut table, results);
        table.to_string()
    }

    /// Format a virtual-user run with its per-scenario breakdown.
    pub fn format_load_table(results: &LoadTestResult) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.summary.name)]);

        Self::summary_rows(&mut table, &results.summary);
        table.add_row(vec!["", ""]);
        table.add_row(vec![
            "Users (peak / avg):",
            &format!(
                "{} / {:.1}",
                results.peak_concurrency, results.average_concurrency
            ),
        ]);

        let mut scenarios = Table::new();
        scenarios
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Scenario", "Weight", "Requests", "Errors", "Mean (ms)", "p95 (ms)"]);
        for (name, scenario) in &results.scenarios {
            scenarios.add_row(vec![
                name.clone(),
                format!("{:.0}%", scenario.weight),
                scenario.summary.total_requests.to_string(),
                format!("{:.1}%", scenario.summary.error_rate * 100.0),
                format!("{:.1}", scenario.summary.latency.mean_ms),
                format!("{:.1}", scenario.summary.latency.p95_ms),
            ]);
        }

        format!("{}\n{}", table, scenarios)
    }

    /// Format a stress run as a step table plus its conclusion.
    pub fn format_stress_table(results: &StressTestResult) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Step",
                "Target (req/s)",
                "Achieved (req/s)",
                "Errors",
                "Mean (ms)",
                "p95 (ms)",
                "Peak CPU",
                "Status",
            ]);

        for step in &results.steps {
            table.add_row(vec![
                step.step.to_string(),
                format!("{:.1}", step.target_rate),
                format!("{:.1}", step.achieved_rate()),
                format!("{:.1}%", step.result.error_rate * 100.0),
                format!("{:.1}", step.result.latency.mean_ms),
                format!("{:.1}", step.result.latency.p95_ms),
                step.result
                    .peak_cpu_percent
                    .map(|c| format!("{:.1}%", c))
                    .unwrap_or_else(|| "-".to_string()),
                if step.violated() {
                    step.violations
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join("; ")
                } else {
                    "ok".to_string()
                },
            ]);
        }

        format!(
            "{}\nOutcome: {:?}\nBreaking point: {:.1} req/s (step {})\nMax sustainable: {:.1} req/s\nCPU saturation: {:.1} req/s, memory saturation: {:.1} req/s",
            table,
            results.outcome,
            results.breaking_point.rate,
            results.breaking_point.step,
            results.system_limits.max_sustainable_rate,
            results.system_limits.cpu_saturation_rate,
            results.system_limits.memory_saturation_rate,
        )
    }

    fn summary_rows(table: &mut Table, results: &TestResult) {
        table.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        table.add_row(vec![
            "Total Requests:",
            &format!("{}", results.total_requests),
        ]);
        table.add_row(vec![
            "Error Rate:",
            &format!("{:.2}%", results.error_rate * 100.0),
        ]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", results.throughput),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "min / mean / p50 / p95 / p99 / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1} / {:.1} / {:.1} / {:.1}",
                results.latency.min_ms,
                results.latency.mean_ms,
                results.latency.p50_ms,
                results.latency.p95_ms,
                results.latency.p99_ms,
                results.latency.max_ms
            ),
        ]);

        if let Some(cpu) = results.peak_cpu_percent {
            table.add_row(vec!["Peak CPU:", &format!("{:.1}%", cpu)]);
        }
        if let Some(memory) = results.peak_memory_mb {
            table.add_row(vec!["Peak Memory:", &format!("{:.1} MB", memory)]);
        }

        let verdict = if results.passed {
            "PASS".to_string()
        } else {
            format!(
                "FAIL ({})",
                results
                    .violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            )
        };
        table.add_row(vec!["Thresholds:", &verdict]);
    }

    /// Format any result as JSON.
    pub fn format_json<T: Serialize>(results: &T) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &TestResult) -> String {
        format!(
            "{},{},{:.1},{},{:.4},{:.1},{:.1},{:.1},{:.1},{}",
            results.started_at.to_rfc3339(),
            results.name,
            results.duration_secs,
            results.total_requests,
            results.error_rate,
            results.throughput,
            results.latency.mean_ms,
            results.latency.p95_ms,
            results.latency.max_ms,
            results.passed
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,name,duration,requests,error_rate,rps,mean_ms,p95_ms,max_ms,passed"
    }
}
