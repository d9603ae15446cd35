//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use load_engine::{
    RequestExecutor, RequestOutcome, RequestTarget, ScenarioConfig, TestConfiguration,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Succeeds after a fixed delay and counts calls.
pub struct SleepExecutor {
    delay: Duration,
    calls: AtomicU64,
}

impl SleepExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for SleepExecutor {
    async fn execute(&self, _target: &RequestTarget) -> RequestOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        RequestOutcome::ok(200, 2)
    }
}

/// Fails every `every`-th request with a 500.
pub struct FlakyExecutor {
    every: u64,
    calls: AtomicU64,
}

impl FlakyExecutor {
    pub fn new(every: u64) -> Self {
        Self {
            every,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RequestExecutor for FlakyExecutor {
    async fn execute(&self, _target: &RequestTarget) -> RequestOutcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if n % self.every == 0 {
            RequestOutcome::failed(Some(500), "HTTP 500")
        } else {
            RequestOutcome::ok(200, 2)
        }
    }
}

/// Fails every other request while the shared rate is above `limit`.
pub struct OverloadExecutor {
    pub current_rate: Arc<AtomicU64>,
    limit: u64,
    calls: AtomicU64,
}

impl OverloadExecutor {
    pub fn new(limit: u64) -> Self {
        Self {
            current_rate: Arc::new(AtomicU64::new(0)),
            limit,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RequestExecutor for OverloadExecutor {
    async fn execute(&self, _target: &RequestTarget) -> RequestOutcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let overloaded = self.current_rate.load(Ordering::SeqCst) > self.limit;
        if overloaded && n % 2 == 0 {
            RequestOutcome::failed(Some(503), "HTTP 503")
        } else {
            RequestOutcome::ok(200, 2)
        }
    }
}

/// Always fails requests for one target id; everything else succeeds.
pub struct TargetFailingExecutor {
    failing: String,
    calls: AtomicU64,
}

impl TargetFailingExecutor {
    pub fn new(failing: &str) -> Self {
        Self {
            failing: failing.to_string(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for TargetFailingExecutor {
    async fn execute(&self, target: &RequestTarget) -> RequestOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        if target.id == self.failing {
            RequestOutcome::failed(Some(500), "HTTP 500")
        } else {
            RequestOutcome::ok(200, 2)
        }
    }
}

/// Tracks the highest number of concurrently executing requests.
pub struct PeakTrackingExecutor {
    delay: Duration,
    current: AtomicU64,
    pub peak: AtomicU64,
}

impl PeakTrackingExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RequestExecutor for PeakTrackingExecutor {
    async fn execute(&self, _target: &RequestTarget) -> RequestOutcome {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        RequestOutcome::ok(200, 0)
    }
}

pub fn ramp_config(name: &str, target_rate: f64, duration_secs: f64) -> TestConfiguration {
    TestConfiguration {
        name: name.to_string(),
        duration_secs,
        ramp_up_secs: 1.0,
        target_rate,
        endpoints: vec!["/api/items".to_string()],
        seed: Some(7),
        ..TestConfiguration::default()
    }
}

pub fn scenario(name: &str, endpoint: &str, weight: f64) -> ScenarioConfig {
    ScenarioConfig {
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        weight,
        method: None,
    }
}
