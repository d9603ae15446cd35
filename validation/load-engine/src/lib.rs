//! Adaptive load and stress testing engine for HTTP endpoints.
//!
//! This crate provides tools to:
//! - Drive a linearly ramped request rate against weighted endpoints
//! - Simulate concurrent virtual users with think time
//! - Step the load up until the target breaks, and report where
//! - Aggregate latency, error and resource statistics per run
//! - Persist results as uniquely named JSON reports

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod report;
pub mod resources;
pub mod runner;
pub mod selection;
pub mod stress;
pub mod users;

pub use aggregate::{LatencyStats, RequestSummary, TestResult, ThresholdViolation};
pub use client::{HttpExecutor, RequestExecutor, RequestOutcome};
pub use config::{
    LoadTestConfig, ResourceLimits, ScenarioConfig, StressTestConfig, TestConfiguration,
    ThinkTime, Thresholds,
};
pub use error::{EngineError, EngineResult, ReportError};
pub use events::{EngineEvent, EventBus, ProgressUpdate};
pub use metrics::{ResourceSample, SampleRecord};
pub use report::{Report, ReportWriter, ResultsReport};
pub use resources::{DisabledSampler, ProcessSampler, ResourceSampler, ResourceUsage};
pub use runner::{LoadRunner, LoadShape, RampShape, RunContext};
pub use selection::{RequestTarget, TargetSelector};
pub use stress::{BreakingPoint, LoadStep, StressController, StressOutcome, StressTestResult, SystemLimits};
pub use users::{ConcurrentUserSimulator, LoadTestResult, ScenarioResult};
