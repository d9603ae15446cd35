//! Virtual-user load tests.
//!
//! Instead of chasing a request rate, each virtual user runs its own loop:
//! pick a weighted scenario, issue one request, think, repeat until the run
//! ends. Throughput is whatever that loop sustains against the target.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::aggregate::{summarize_by_target, RequestSummary, TestResult};
use crate::config::{LoadTestConfig, ThinkTime};
use crate::error::EngineResult;
use crate::runner::{seeded_rng, LoadRunner, LoadShape, RunContext, RAMP_TICK};
use crate::selection::TargetSelector;

/// Number of users that should be active `elapsed` into the run.
///
/// Users are spread linearly over ramp-up; all start at once without one.
pub fn users_due(users: usize, ramp_up: Duration, elapsed: Duration) -> usize {
    let ramp = ramp_up.as_secs_f64();
    if ramp <= 0.0 {
        return users;
    }
    let fraction = (elapsed.as_secs_f64() / ramp).min(1.0);
    ((users as f64 * fraction).ceil() as usize).min(users)
}

/// Draw a think-time pause uniformly from the configured range.
pub fn think_time_draw<R: Rng + ?Sized>(rng: &mut R, think_time: &ThinkTime) -> Duration {
    Duration::from_millis(rng.gen_range(think_time.min_ms..=think_time.max_ms))
}

/// Active-user accounting shared by all sessions of one run.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    active: AtomicU64,
    peak: AtomicU64,
    sample_sum: AtomicU64,
    sample_count: AtomicU64,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn sample(&self) {
        self.sample_sum
            .fetch_add(self.active.load(Ordering::SeqCst), Ordering::SeqCst);
        self.sample_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn average(&self) -> f64 {
        let count = self.sample_count.load(Ordering::SeqCst);
        if count == 0 {
            0.0
        } else {
            self.sample_sum.load(Ordering::SeqCst) as f64 / count as f64
        }
    }
}

/// Traffic shape of independent looping users.
pub struct VirtualUserShape {
    selector: Arc<TargetSelector>,
    users: usize,
    ramp_up: Duration,
    think_time: ThinkTime,
    seed: Option<u64>,
    tracker: Arc<ConcurrencyTracker>,
}

impl VirtualUserShape {
    pub fn from_config(config: &LoadTestConfig) -> EngineResult<Self> {
        Ok(Self {
            selector: Arc::new(TargetSelector::from_config(&config.base)?),
            users: config.concurrent_users,
            ramp_up: config.base.ramp_up(),
            think_time: config.think_time,
            seed: config.base.seed,
            tracker: Arc::new(ConcurrencyTracker::default()),
        })
    }

    pub fn tracker(&self) -> &ConcurrencyTracker {
        &self.tracker
    }
}

#[async_trait]
impl LoadShape for VirtualUserShape {
    fn name(&self) -> &'static str {
        "virtual_users"
    }

    async fn drive(&self, ctx: &RunContext) -> Vec<JoinHandle<()>> {
        let mut ticker = interval(RAMP_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut handles = Vec::with_capacity(self.users);

        loop {
            ticker.tick().await;
            if !ctx.is_active() {
                break;
            }

            let wanted = users_due(self.users, self.ramp_up, ctx.elapsed());
            while handles.len() < wanted {
                let user_id = handles.len() as u64;
                let rng = seeded_rng(self.seed.map(|s| s.wrapping_add(user_id)));
                handles.push(tokio::spawn(session(
                    user_id,
                    ctx.clone(),
                    self.selector.clone(),
                    self.think_time,
                    rng,
                    self.tracker.clone(),
                )));
            }
            self.tracker.sample();
        }

        debug!(
            users = handles.len(),
            peak = self.tracker.peak(),
            "Virtual user spawning finished"
        );
        handles
    }
}

/// One virtual user's loop.
///
/// A failed request is already recorded by the context; the loop carries on.
async fn session(
    user_id: u64,
    ctx: RunContext,
    selector: Arc<TargetSelector>,
    think_time: ThinkTime,
    mut rng: StdRng,
    tracker: Arc<ConcurrencyTracker>,
) {
    tracker.enter();
    let mut requests = 0u64;

    while ctx.is_active() {
        let target = selector.pick(&mut rng);
        if ctx.issue(target).await.is_none() {
            break;
        }
        requests += 1;

        let pause = think_time_draw(&mut rng, &think_time);
        sleep_until((Instant::now() + pause).min(ctx.deadline())).await;
    }

    tracker.leave();
    debug!(user_id, requests, "Virtual user finished");
}

/// Per-scenario slice of a load test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioResult {
    pub endpoint: String,
    pub weight: f64,
    #[serde(flatten)]
    pub summary: RequestSummary,
}

/// Result of a virtual-user load test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTestResult {
    pub summary: TestResult,
    pub scenarios: BTreeMap<String, ScenarioResult>,
    pub concurrent_users: usize,
    pub peak_concurrency: u64,
    pub average_concurrency: f64,
    pub think_time: ThinkTime,
}

/// Runs virtual-user load tests on top of a [`LoadRunner`].
pub struct ConcurrentUserSimulator {
    runner: LoadRunner,
}

impl ConcurrentUserSimulator {
    pub fn new(runner: LoadRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &LoadRunner {
        &self.runner
    }

    pub async fn run(&self, config: &LoadTestConfig) -> EngineResult<LoadTestResult> {
        config.validate()?;
        let shape = VirtualUserShape::from_config(config)?;

        let raw = self.runner.execute(&config.base, &shape).await;
        let summary = raw.aggregate(&config.base.name, &config.base.thresholds);

        // Every configured scenario gets a bucket, even if it drew nothing
        let mut by_target = summarize_by_target(&raw.samples);
        let scenarios = config
            .base
            .scenarios
            .iter()
            .map(|scenario| {
                let result = ScenarioResult {
                    endpoint: scenario.endpoint.clone(),
                    weight: scenario.weight,
                    summary: by_target.remove(&scenario.name).unwrap_or_default(),
                };
                (scenario.name.clone(), result)
            })
            .collect();

        let tracker = shape.tracker();
        info!(
            test = %config.base.name,
            users = config.concurrent_users,
            peak = tracker.peak(),
            average = tracker.average(),
            total = summary.total_requests,
            error_rate = summary.error_rate,
            "Virtual user test complete"
        );

        Ok(LoadTestResult {
            summary,
            scenarios,
            concurrent_users: config.concurrent_users,
            peak_concurrency: tracker.peak(),
            average_concurrency: tracker.average(),
            think_time: config.think_time,
        })
    }
}
