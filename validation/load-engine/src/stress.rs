//! Stepped stress testing.
//!
//! Runs fixed-duration ramp steps at increasing target rates until a step
//! violates a limit or the next step would exceed `max_load`:
//!
//! ```text
//! Stepping ──violation──────────────▶ BreakingPointFound
//!    │  ╰─next rate > max_load──────▶ MaxLoadReached
//!    ╰─otherwise: rate += increment, run next step
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{TestResult, ThresholdViolation};
use crate::config::{ResourceLimits, StressTestConfig};
use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::runner::{LoadRunner, RampShape};

/// Terminal state of a stress run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StressOutcome {
    BreakingPointFound,
    MaxLoadReached,
}

/// Controller state after a step has been evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StressState {
    Stepping { target_rate: f64 },
    Finished(StressOutcome),
}

/// Decide what follows a step run at `target_rate`.
pub fn next_state(target_rate: f64, violated: bool, increment_step: f64, max_load: f64) -> StressState {
    if violated {
        StressState::Finished(StressOutcome::BreakingPointFound)
    } else if target_rate + increment_step > max_load {
        StressState::Finished(StressOutcome::MaxLoadReached)
    } else {
        StressState::Stepping {
            target_rate: target_rate + increment_step,
        }
    }
}

/// One completed stress step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadStep {
    /// 1-based position in the step sequence.
    pub step: usize,
    pub target_rate: f64,
    pub result: TestResult,
    pub violations: Vec<ThresholdViolation>,
}

impl LoadStep {
    pub fn violated(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn achieved_rate(&self) -> f64 {
        self.result.throughput
    }
}

/// Violation predicate for one step.
///
/// Resource usage is the step's peak sample; absent samples never violate.
pub fn evaluate_step(
    result: &TestResult,
    failure_threshold: f64,
    limits: &ResourceLimits,
) -> Vec<ThresholdViolation> {
    let mut violations = Vec::new();
    if result.error_rate > failure_threshold {
        violations.push(ThresholdViolation::ErrorRate {
            actual: result.error_rate,
            limit: failure_threshold,
        });
    }
    if let Some(cpu) = result.peak_cpu_percent.filter(|&c| c > limits.cpu_percent) {
        violations.push(ThresholdViolation::CpuUsage {
            actual_percent: cpu,
            limit_percent: limits.cpu_percent,
        });
    }
    if let Some(memory) = result.peak_memory_mb.filter(|&m| m > limits.memory_mb) {
        violations.push(ThresholdViolation::MemoryUsage {
            actual_mb: memory,
            limit_mb: limits.memory_mb,
        });
    }
    if result.latency.mean_ms > limits.response_time_ms {
        violations.push(ThresholdViolation::MeanLatency {
            actual_ms: result.latency.mean_ms,
            limit_ms: limits.response_time_ms,
        });
    }
    violations
}

/// The step a stress run stopped at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakingPoint {
    pub step: usize,
    /// Target rate of the step.
    pub rate: f64,
    pub achieved_rate: f64,
    pub error_rate: f64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// False when the run stopped at the ceiling without a violation.
    pub violated: bool,
    pub violations: Vec<ThresholdViolation>,
}

impl From<&LoadStep> for BreakingPoint {
    fn from(step: &LoadStep) -> Self {
        Self {
            step: step.step,
            rate: step.target_rate,
            achieved_rate: step.achieved_rate(),
            error_rate: step.result.error_rate,
            mean_latency_ms: step.result.latency.mean_ms,
            p95_latency_ms: step.result.latency.p95_ms,
            violated: step.violated(),
            violations: step.violations.clone(),
        }
    }
}

/// Capacity figures derived from the step sequence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemLimits {
    /// Highest achieved rate among non-violating steps.
    pub max_sustainable_rate: f64,
    /// Target rate of the first step whose CPU crossed the limit, 0 if none.
    pub cpu_saturation_rate: f64,
    /// Target rate of the first step whose memory crossed the limit, 0 if none.
    pub memory_saturation_rate: f64,
}

pub fn derive_limits(steps: &[LoadStep], limits: &ResourceLimits) -> SystemLimits {
    let max_sustainable_rate = steps
        .iter()
        .filter(|s| !s.violated())
        .map(LoadStep::achieved_rate)
        .fold(0.0, f64::max);

    let cpu_saturation_rate = steps
        .iter()
        .find(|s| s.result.peak_cpu_percent.map_or(false, |c| c > limits.cpu_percent))
        .map_or(0.0, |s| s.target_rate);

    let memory_saturation_rate = steps
        .iter()
        .find(|s| s.result.peak_memory_mb.map_or(false, |m| m > limits.memory_mb))
        .map_or(0.0, |s| s.target_rate);

    SystemLimits {
        max_sustainable_rate,
        cpu_saturation_rate,
        memory_saturation_rate,
    }
}

/// Result of a stress run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTestResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub config: StressTestConfig,
    pub steps: Vec<LoadStep>,
    pub outcome: StressOutcome,
    pub breaking_point: BreakingPoint,
    pub system_limits: SystemLimits,
}

/// Drives stepped stress runs on top of a [`LoadRunner`].
pub struct StressController {
    runner: LoadRunner,
}

impl StressController {
    pub fn new(runner: LoadRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &LoadRunner {
        &self.runner
    }

    pub async fn run(&self, config: &StressTestConfig) -> EngineResult<StressTestResult> {
        config.validate()?;
        let started_at = Utc::now();
        let events = self.runner.events();

        info!(
            test = %config.base.name,
            start_rate = config.base.target_rate,
            max_load = config.max_load,
            increment = config.increment_step,
            step_duration_secs = config.step_duration_secs,
            "Starting stress test"
        );

        let mut steps: Vec<LoadStep> = Vec::new();
        let mut target_rate = config.base.target_rate;

        let (outcome, breaking_point) = loop {
            let step = steps.len() + 1;
            events.publish(EngineEvent::StepStarted { step, target_rate });

            let step_config = config.step_config(step, target_rate);
            let shape = RampShape::from_config(&step_config)?;
            let raw = self.runner.execute(&step_config, &shape).await;
            let result = raw.aggregate(&step_config.name, &step_config.thresholds);

            let violations = evaluate_step(&result, config.failure_threshold, &config.resource_limits);
            let load_step = LoadStep {
                step,
                target_rate,
                result,
                violations,
            };

            if load_step.violated() {
                warn!(
                    step,
                    target_rate,
                    error_rate = load_step.result.error_rate,
                    mean_ms = load_step.result.latency.mean_ms,
                    violations = load_step.violations.len(),
                    "Stress step violated limits"
                );
            } else {
                info!(
                    step,
                    target_rate,
                    achieved_rate = load_step.achieved_rate(),
                    error_rate = load_step.result.error_rate,
                    "Stress step passed"
                );
            }

            events.publish(EngineEvent::StepComplete(Box::new(load_step.clone())));
            let state = next_state(
                target_rate,
                load_step.violated(),
                config.increment_step,
                config.max_load,
            );

            match state {
                StressState::Stepping { target_rate: next } => {
                    steps.push(load_step);
                    target_rate = next;
                }
                StressState::Finished(outcome) => {
                    // Stops at the first violation, so the final step is the
                    // breaking point in both terminal states
                    let breaking_point = BreakingPoint::from(&load_step);
                    steps.push(load_step);
                    break (outcome, breaking_point);
                }
            }
        };

        let system_limits = derive_limits(&steps, &config.resource_limits);

        info!(
            test = %config.base.name,
            outcome = ?outcome,
            steps = steps.len(),
            breaking_rate = breaking_point.rate,
            max_sustainable_rate = system_limits.max_sustainable_rate,
            "Stress test complete"
        );

        Ok(StressTestResult {
            name: config.base.name.clone(),
            started_at,
            config: config.clone(),
            steps,
            outcome,
            breaking_point,
            system_limits,
        })
    }
}
