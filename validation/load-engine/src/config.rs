//! Configuration loading and validation.
//!
//! All three run modes share [`TestConfiguration`]; the virtual-user and
//! stress modes wrap it and add their own fields. Configurations are plain
//! data: a runner borrows one for the length of a run and never mutates it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Scenario weights are percentages and are expected to add up to this.
pub const WEIGHT_TOTAL: f64 = 100.0;

/// Base configuration for a single bounded-duration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Prefix joined onto endpoints that start with `/`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
    #[serde(default)]
    pub ramp_up_secs: f64,
    /// Requests per second once ramp-up completes.
    #[serde(default)]
    pub target_rate: f64,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Cap on outstanding requests. `None` keeps offered load unbounded.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>, // Optional RNG seed for reproducible selection
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,
}

/// A named, weighted request target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub endpoint: String,
    /// Percentage share of draws.
    pub weight: f64,
    #[serde(default)]
    pub method: Option<String>,
}

/// Pass/fail ceilings applied to a finished result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// Ceiling on mean latency (ms).
    #[serde(default = "default_response_time_ms")]
    pub response_time_ms: f64,
    /// Ceiling on failed / total.
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    /// Ceiling on p95 latency (ms).
    #[serde(default = "default_p95_ms")]
    pub p95_ms: f64,
}

/// Pause range between requests of one virtual user, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThinkTime {
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Virtual-user load test configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    #[serde(flatten)]
    pub base: TestConfiguration,
    pub concurrent_users: usize,
    #[serde(default)]
    pub think_time: ThinkTime,
}

/// Stepped stress test configuration.
///
/// `base.target_rate` is the rate of the first step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTestConfig {
    #[serde(flatten)]
    pub base: TestConfiguration,
    pub max_load: f64,
    pub increment_step: f64,
    pub step_duration_secs: f64,
    /// Error rate above which a step counts as violated.
    pub failure_threshold: f64,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

/// Limits evaluated against each stress step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    #[serde(default = "default_cpu_limit")]
    pub cpu_percent: f64,
    #[serde(default = "default_memory_limit")]
    pub memory_mb: f64,
    /// Ceiling on a step's mean latency (ms).
    #[serde(default = "default_response_time_ms")]
    pub response_time_ms: f64,
}

/// Longest accepted run, step or timeout: one week.
pub const MAX_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

/// Finite and strictly positive; rejects NaN.
fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// A positive number of seconds no longer than [`MAX_SECONDS`].
fn bounded_secs(value: f64) -> bool {
    positive(value) && value <= MAX_SECONDS
}

/// Seconds to a `Duration`, clamped so out-of-range input cannot panic.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SECONDS)).unwrap_or_default()
}

fn default_duration() -> f64 {
    60.0
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_request_timeout() -> f64 {
    30.0
}

fn default_response_time_ms() -> f64 {
    1000.0
}

fn default_error_rate() -> f64 {
    0.05
}

fn default_p95_ms() -> f64 {
    2000.0
}

fn default_cpu_limit() -> f64 {
    80.0
}

fn default_memory_limit() -> f64 {
    1024.0
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            description: String::new(),
            base_url: None,
            duration_secs: default_duration(),
            ramp_up_secs: 0.0,
            target_rate: 0.0,
            endpoints: Vec::new(),
            scenarios: Vec::new(),
            method: default_method(),
            thresholds: Thresholds::default(),
            max_in_flight: None,
            seed: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            response_time_ms: default_response_time_ms(),
            error_rate: default_error_rate(),
            p95_ms: default_p95_ms(),
        }
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self {
            min_ms: 1000,
            max_ms: 3000,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_limit(),
            memory_mb: default_memory_limit(),
            response_time_ms: default_response_time_ms(),
        }
    }
}

impl ThinkTime {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

/// Load any configuration type from a YAML file.
fn load_yaml<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| EngineError::ConfigFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

impl TestConfiguration {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        load_yaml(path.as_ref())
    }

    pub fn duration(&self) -> Duration {
        secs(self.duration_secs)
    }

    pub fn ramp_up(&self) -> Duration {
        secs(self.ramp_up_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_secs)
    }

    /// Resolve an endpoint against `base_url`.
    ///
    /// Only paths starting with `/` are joined; absolute URLs pass through.
    pub fn resolve_url(&self, endpoint: &str) -> String {
        match &self.base_url {
            Some(base) if endpoint.starts_with('/') => {
                format!("{}{}", base.trim_end_matches('/'), endpoint)
            }
            _ => endpoint.to_string(),
        }
    }

    /// Validate a constant-ramp run.
    pub fn validate(&self) -> EngineResult<()> {
        if !bounded_secs(self.duration_secs) {
            return Err(EngineError::config("duration_secs must be > 0 and at most one week"));
        }
        if !positive(self.target_rate) {
            return Err(EngineError::config("target_rate must be > 0"));
        }
        self.validate_common()
    }

    /// Checks shared by every run mode: targets, method, ramp and thresholds.
    pub(crate) fn validate_common(&self) -> EngineResult<()> {
        self.validate_targets()?;
        if !(0.0..=MAX_SECONDS).contains(&self.ramp_up_secs) {
            return Err(EngineError::config("ramp_up_secs must be >= 0 and at most one week"));
        }
        if !bounded_secs(self.request_timeout_secs) {
            return Err(EngineError::config(
                "request_timeout_secs must be > 0 and at most one week",
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(EngineError::config("max_in_flight must be > 0 when set"));
        }
        self.thresholds.validate()
    }

    fn validate_targets(&self) -> EngineResult<()> {
        if self.endpoints.is_empty() && self.scenarios.is_empty() {
            return Err(EngineError::config(
                "at least one endpoint or scenario must be specified",
            ));
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(EngineError::config("endpoints must not be blank"));
        }
        parse_method(&self.method)?;

        // Per-scenario results are keyed by name
        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(EngineError::config(format!(
                    "duplicate scenario name '{}'",
                    scenario.name
                )));
            }
            if scenario.endpoint.trim().is_empty() {
                return Err(EngineError::config(format!(
                    "scenario '{}' has no endpoint",
                    scenario.name
                )));
            }
            if scenario.weight < 0.0 || !scenario.weight.is_finite() {
                return Err(EngineError::config(format!(
                    "scenario '{}' has invalid weight {}",
                    scenario.name, scenario.weight
                )));
            }
            if let Some(method) = &scenario.method {
                parse_method(method)?;
            }
        }

        if !self.scenarios.is_empty() {
            let total: f64 = self.scenarios.iter().map(|s| s.weight).sum();
            if (total - WEIGHT_TOTAL).abs() > 0.01 {
                // Draws past the cumulative sum fall back to the first scenario.
                warn!(
                    config = %self.name,
                    total_weight = total,
                    "Scenario weights do not sum to 100"
                );
            }
        }
        Ok(())
    }
}

impl Thresholds {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.response_time_ms >= 0.0) || !(self.p95_ms >= 0.0) {
            return Err(EngineError::config("latency thresholds must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.error_rate) {
            return Err(EngineError::config(
                "thresholds.error_rate must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

impl LoadTestConfig {
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        load_yaml(path.as_ref())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !bounded_secs(self.base.duration_secs) {
            return Err(EngineError::config("duration_secs must be > 0 and at most one week"));
        }
        if self.base.scenarios.is_empty() {
            return Err(EngineError::config(
                "a load test needs at least one scenario",
            ));
        }
        if self.concurrent_users == 0 {
            return Err(EngineError::config("concurrent_users must be > 0"));
        }
        if self.think_time.min_ms > self.think_time.max_ms {
            return Err(EngineError::config(
                "think_time.min_ms must not exceed think_time.max_ms",
            ));
        }
        self.base.validate_common()
    }
}

impl StressTestConfig {
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        load_yaml(path.as_ref())
    }

    pub fn step_duration(&self) -> Duration {
        secs(self.step_duration_secs)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !positive(self.base.target_rate) {
            return Err(EngineError::config("target_rate must be > 0"));
        }
        if !positive(self.increment_step) {
            return Err(EngineError::config("increment_step must be > 0"));
        }
        if !self.max_load.is_finite() || self.max_load < self.base.target_rate {
            return Err(EngineError::config(
                "max_load must be >= the starting target_rate",
            ));
        }
        if !bounded_secs(self.step_duration_secs) {
            return Err(EngineError::config(
                "step_duration_secs must be > 0 and at most one week",
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(EngineError::config(
                "failure_threshold must be within [0, 1]",
            ));
        }
        let limits = &self.resource_limits;
        if !positive(limits.cpu_percent) || !positive(limits.memory_mb) {
            return Err(EngineError::config("resource limits must be > 0"));
        }
        if !(limits.response_time_ms >= 0.0) {
            return Err(EngineError::config(
                "resource_limits.response_time_ms must be >= 0",
            ));
        }
        self.base.validate_common()
    }

    /// Base configuration for one step at `target_rate`.
    ///
    /// Each step ramps up over half its duration.
    pub fn step_config(&self, step: usize, target_rate: f64) -> TestConfiguration {
        TestConfiguration {
            name: format!("{} step {}", self.base.name, step),
            duration_secs: self.step_duration_secs,
            ramp_up_secs: self.step_duration_secs / 2.0,
            target_rate,
            ..self.base.clone()
        }
    }
}

/// Parse an HTTP method name.
pub fn parse_method(method: &str) -> EngineResult<reqwest::Method> {
    reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| EngineError::config(format!("invalid HTTP method '{}'", method)))
}
