//! Load test orchestration.
//!
//! [`LoadRunner`] owns the parts every run mode shares: the request
//! executor, the resource sampler, the event bus, the 1s monitor tick and
//! final aggregation. What differs between modes is only how requests are
//! issued, which is delegated to a [`LoadShape`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, TestResult};
use crate::client::{issue_request, HttpExecutor, RequestExecutor};
use crate::config::{Thresholds, TestConfiguration};
use crate::error::EngineResult;
use crate::events::{EngineEvent, EventBus, ProgressUpdate};
use crate::metrics::{MetricsCollector, ResourceSample, SampleRecord};
use crate::resources::{ProcessSampler, ResourceSampler};
use crate::selection::{RequestTarget, TargetSelector};

/// How often the ramp loop re-evaluates its target.
pub const RAMP_TICK: Duration = Duration::from_millis(20);

/// Resource sampling and progress interval.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Finished handles are pruned once this many accumulate.
const HANDLE_PRUNE_THRESHOLD: usize = 1024;

/// Number of requests that should have been started `elapsed` into a run.
///
/// `target_rate × min(t / ramp_up, 1) × t`; a zero ramp-up is flat from the
/// start.
pub fn target_so_far(target_rate: f64, ramp_up: Duration, elapsed: Duration) -> f64 {
    let t = elapsed.as_secs_f64();
    let ramp = ramp_up.as_secs_f64();
    let fraction = if ramp > 0.0 { (t / ramp).min(1.0) } else { 1.0 };
    target_rate * fraction * t
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Shared state for one run, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct RunContext {
    executor: Arc<dyn RequestExecutor>,
    collector: Arc<Mutex<MetricsCollector>>,
    events: EventBus,
    in_flight: Arc<AtomicU64>,
    limiter: Option<Arc<Semaphore>>,
    started: Instant,
    duration: Duration,
}

impl RunContext {
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether new requests may still be issued.
    pub fn is_active(&self) -> bool {
        Instant::now() < self.deadline()
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start one request in its own task.
    ///
    /// With an in-flight cap this waits for a permit first, so a saturated
    /// target slows issuance down instead of piling up tasks. Returns `None`
    /// when the deadline passes before the request could start.
    pub async fn spawn_request(&self, target: RequestTarget) -> Option<JoinHandle<()>> {
        let Admission::Granted(permit) = self.admit().await else {
            return None;
        };
        let ctx = self.clone();
        Some(tokio::spawn(async move {
            ctx.execute_and_record(&target).await;
            drop(permit);
        }))
    }

    /// Issue one request inline and record it.
    ///
    /// Returns whether it succeeded, or `None` if the run ended before it
    /// could start.
    pub async fn issue(&self, target: &RequestTarget) -> Option<bool> {
        let Admission::Granted(_permit) = self.admit().await else {
            return None;
        };
        Some(self.execute_and_record(target).await)
    }

    /// Wait for an in-flight permit, giving up at the deadline.
    async fn admit(&self) -> Admission {
        let Some(limiter) = &self.limiter else {
            return if self.is_active() {
                Admission::Granted(None)
            } else {
                Admission::Expired
            };
        };

        tokio::select! {
            permit = limiter.clone().acquire_owned() => match permit {
                // The permit may free up only after the deadline
                Ok(permit) if self.is_active() => Admission::Granted(Some(permit)),
                _ => Admission::Expired,
            },
            _ = sleep_until(self.deadline()) => Admission::Expired,
        }
    }

    async fn execute_and_record(&self, target: &RequestTarget) -> bool {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let sample = issue_request(self.executor.as_ref(), target, self.started).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        let success = sample.success;
        self.events.publish_sample(&sample);
        self.collector.lock().await.record(sample);
        success
    }
}

/// Outcome of waiting to start a request.
enum Admission {
    /// Start now; holds the in-flight permit when the run is capped.
    Granted(Option<OwnedSemaphorePermit>),
    Expired,
}

/// A traffic pattern.
///
/// `drive` issues load until the context deadline and returns handles to
/// whatever is still running; the runner awaits them before aggregating.
#[async_trait]
pub trait LoadShape: Send + Sync {
    fn name(&self) -> &'static str;

    async fn drive(&self, ctx: &RunContext) -> Vec<JoinHandle<()>>;
}

/// Linear ramp to a flat target rate.
pub struct RampShape {
    selector: TargetSelector,
    target_rate: f64,
    ramp_up: Duration,
    seed: Option<u64>,
}

impl RampShape {
    pub fn new(selector: TargetSelector, target_rate: f64, ramp_up: Duration, seed: Option<u64>) -> Self {
        Self {
            selector,
            target_rate,
            ramp_up,
            seed,
        }
    }

    pub fn from_config(config: &TestConfiguration) -> EngineResult<Self> {
        Ok(Self::new(
            TargetSelector::from_config(config)?,
            config.target_rate,
            config.ramp_up(),
            config.seed,
        ))
    }
}

#[async_trait]
impl LoadShape for RampShape {
    fn name(&self) -> &'static str {
        "ramp"
    }

    async fn drive(&self, ctx: &RunContext) -> Vec<JoinHandle<()>> {
        let mut rng = seeded_rng(self.seed);
        let mut ticker = interval(RAMP_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut issued = 0u64;
        let mut handles = Vec::new();

        loop {
            ticker.tick().await;
            let elapsed = ctx.elapsed();
            if elapsed >= ctx.duration() {
                break;
            }

            let due = target_so_far(self.target_rate, self.ramp_up, elapsed).floor() as u64;
            while issued < due && ctx.is_active() {
                let target = self.selector.pick(&mut rng).clone();
                match ctx.spawn_request(target).await {
                    Some(handle) => handles.push(handle),
                    None => break,
                }
                issued += 1;
            }

            if handles.len() >= HANDLE_PRUNE_THRESHOLD {
                handles.retain(|h| !h.is_finished());
            }
        }

        debug!(issued, "Ramp issuance finished");
        handles
    }
}

/// Raw data collected by one run, before aggregation.
#[derive(Debug, Clone)]
pub struct RawRun {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub samples: Vec<SampleRecord>,
    pub resources: Vec<ResourceSample>,
}

impl RawRun {
    pub fn aggregate(&self, name: &str, thresholds: &Thresholds) -> TestResult {
        aggregate(
            name,
            self.started_at,
            self.duration,
            &self.samples,
            self.resources.clone(),
            thresholds,
        )
    }
}

/// Executes load tests.
pub struct LoadRunner {
    executor: Arc<dyn RequestExecutor>,
    sampler: Arc<std::sync::Mutex<Box<dyn ResourceSampler>>>,
    events: EventBus,
}

impl LoadRunner {
    /// Create a runner that samples the current process.
    pub fn new(executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            executor,
            sampler: Arc::new(std::sync::Mutex::new(Box::new(ProcessSampler::new()))),
            events: EventBus::new(),
        }
    }

    /// Create a runner that issues real HTTP requests.
    pub fn http(config: &TestConfiguration) -> EngineResult<Self> {
        let executor = HttpExecutor::new(config.request_timeout())?;
        Ok(Self::new(Arc::new(executor)))
    }

    pub fn with_sampler(mut self, sampler: impl ResourceSampler + 'static) -> Self {
        self.sampler = Arc::new(std::sync::Mutex::new(Box::new(sampler)));
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Run one constant-ramp test.
    ///
    /// Configuration errors are returned before any request is issued.
    pub async fn run(&self, config: &TestConfiguration) -> EngineResult<TestResult> {
        config.validate()?;
        let shape = RampShape::from_config(config)?;

        let raw = self.execute(config, &shape).await;
        let result = raw.aggregate(&config.name, &config.thresholds);

        info!(
            test = %config.name,
            total = result.total_requests,
            failed = result.failed_requests,
            throughput = result.throughput,
            mean_ms = result.latency.mean_ms,
            p95_ms = result.latency.p95_ms,
            passed = result.passed,
            "Load test complete"
        );
        Ok(result)
    }

    /// Drive `shape` for `config.duration()` and collect raw data.
    ///
    /// The caller is responsible for validating `config`.
    pub async fn execute(&self, config: &TestConfiguration, shape: &dyn LoadShape) -> RawRun {
        let duration = config.duration();
        let started_at = Utc::now();
        let ctx = RunContext {
            executor: self.executor.clone(),
            collector: Arc::new(Mutex::new(MetricsCollector::new())),
            events: self.events.clone(),
            in_flight: Arc::new(AtomicU64::new(0)),
            limiter: config.max_in_flight.map(|n| Arc::new(Semaphore::new(n))),
            started: Instant::now(),
            duration,
        };

        info!(
            test = %config.name,
            shape = shape.name(),
            duration_secs = duration.as_secs_f64(),
            target_rate = config.target_rate,
            ramp_up_secs = config.ramp_up_secs,
            max_in_flight = ?config.max_in_flight,
            "Starting load test"
        );

        let monitor = tokio::spawn(monitor(ctx.clone(), self.sampler.clone()));

        let outstanding = shape.drive(&ctx).await;
        debug!(
            pending = outstanding.len(),
            in_flight = ctx.in_flight(),
            "Waiting for in-flight requests"
        );
        for result in join_all(outstanding).await {
            if let Err(e) = result {
                warn!(error = %e, "Request task failed");
            }
        }

        let resources = monitor.await.unwrap_or_else(|e| {
            warn!(error = %e, "Resource monitor failed");
            Vec::new()
        });
        let samples = std::mem::take(&mut *ctx.collector.lock().await).into_samples();

        RawRun {
            started_at,
            duration,
            samples,
            resources,
        }
    }
}

/// Sample resources and publish progress once per tick for the run.
async fn monitor(
    ctx: RunContext,
    sampler: Arc<std::sync::Mutex<Box<dyn ResourceSampler>>>,
) -> Vec<ResourceSample> {
    let duration_secs = ctx.duration().as_secs_f64();
    let ticks = (duration_secs / SAMPLE_INTERVAL.as_secs_f64()).ceil().max(1.0) as u64;
    let mut samples = Vec::with_capacity(ticks as usize);

    for tick in 1..=ticks {
        // A trailing partial interval is sampled at the deadline
        sleep_until((ctx.started() + SAMPLE_INTERVAL * tick as u32).min(ctx.deadline())).await;

        let usage = sampler.lock().ok().and_then(|mut s| s.sample());
        if usage.is_none() {
            debug!(tick, "Resource sample unavailable");
        }
        let elapsed = ctx.elapsed().as_secs_f64();
        samples.push(ResourceSample {
            tick,
            elapsed_secs: elapsed,
            cpu_percent: usage.map(|u| u.cpu_percent),
            memory_mb: usage.map(|u| u.memory_mb),
        });

        let live = ctx.collector.lock().await.live();
        let update = ProgressUpdate {
            elapsed_fraction: (elapsed / duration_secs).min(1.0),
            current_rate: if elapsed > 0.0 {
                live.completed as f64 / elapsed
            } else {
                0.0
            },
            error_rate: live.error_rate(),
            mean_latency_ms: live.mean_latency_ms,
            p95_latency_ms: live.p95_latency_ms,
            in_flight: ctx.in_flight(),
        };
        debug!(
            tick,
            completed = live.completed,
            rate = update.current_rate,
            error_rate = update.error_rate,
            in_flight = update.in_flight,
            "Progress"
        );
        ctx.events().publish(EngineEvent::Progress(update));
    }

    samples
}
