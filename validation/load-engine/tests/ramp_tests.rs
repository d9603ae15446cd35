//! Integration tests for the constant-rate ramp runner.

mod common;

use common::{ramp_config, PeakTrackingExecutor, FlakyExecutor, SleepExecutor};
use load_engine::{DisabledSampler, EngineEvent, LoadRunner, TestConfiguration};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

// ============================================================================
// Ramp behaviour
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ramp_issues_expected_volume() {
    let executor = Arc::new(SleepExecutor::new(Duration::from_millis(50)));
    let runner = LoadRunner::new(executor.clone()).with_sampler(DisabledSampler);

    // 10 req/s, 1s ramp, 2s run: 10 * min(t, 1) * t reaches 20 at t = 2
    let config = ramp_config("ramp", 10.0, 2.0);
    let result = runner.run(&config).await.unwrap();

    assert!(
        (15..=21).contains(&result.total_requests),
        "issued {}",
        result.total_requests
    );
    assert_eq!(result.total_requests, executor.calls());
    assert_eq!(result.failed_requests, 0);
    assert_eq!(result.error_rate, 0.0);
    assert!(
        result.latency.mean_ms >= 45.0 && result.latency.mean_ms < 80.0,
        "mean {}ms",
        result.latency.mean_ms
    );
    assert!(result.latency.min_ms <= result.latency.p95_ms);
    assert!(result.latency.p95_ms <= result.latency.max_ms);
    assert!(result.passed);

    // One resource sample per second, absent under the disabled sampler
    assert_eq!(result.resource_usage.len(), 2);
    assert!(result.resource_usage.iter().all(|s| s.is_absent()));
    assert_eq!(result.peak_cpu_percent, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_errors_are_counted_not_raised() {
    let runner = LoadRunner::new(Arc::new(FlakyExecutor::new(2))).with_sampler(DisabledSampler);
    let config = TestConfiguration {
        ramp_up_secs: 0.0,
        ..ramp_config("flaky", 20.0, 1.0)
    };

    let result = runner.run(&config).await.unwrap();

    assert!(result.total_requests > 0);
    assert_eq!(
        result.total_requests,
        result.successful_requests + result.failed_requests
    );
    assert!((result.error_rate - 0.5).abs() < 0.1, "error rate {}", result.error_rate);
    // Default error-rate threshold is 5%
    assert!(!result.passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_in_flight_caps_concurrency() {
    let tracker = Arc::new(PeakTrackingExecutor::new(Duration::from_millis(100)));
    let runner = LoadRunner::new(tracker.clone()).with_sampler(DisabledSampler);
    let config = TestConfiguration {
        ramp_up_secs: 0.0,
        max_in_flight: Some(2),
        ..ramp_config("capped", 50.0, 1.0)
    };

    let result = runner.run(&config).await.unwrap();

    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
    // At most two requests per 100ms plus the pair in flight at the deadline
    assert!(result.total_requests <= 24, "issued {}", result.total_requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capped_issuance_stops_at_deadline() {
    let tracker = Arc::new(PeakTrackingExecutor::new(Duration::from_millis(400)));
    let runner = LoadRunner::new(tracker).with_sampler(DisabledSampler);
    let mut rx = runner.subscribe();
    let config = TestConfiguration {
        ramp_up_secs: 0.0,
        max_in_flight: Some(1),
        ..ramp_config("capped-deadline", 50.0, 1.0)
    };

    let result = runner.run(&config).await.unwrap();

    // Requests start near 20, 420 and 820ms; the next permit frees after 1s
    assert!(result.total_requests <= 3, "issued {}", result.total_requests);
    let mut offsets = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Request(sample) = event {
            offsets.push(sample.offset_ms);
        }
    }
    assert_eq!(offsets.len() as u64, result.total_requests);
    assert!(
        offsets.iter().all(|&ms| ms <= 1005.0),
        "late request at {:?}",
        offsets
    );
}

// ============================================================================
// Configuration errors
// ============================================================================

#[tokio::test]
async fn test_invalid_config_issues_no_traffic() {
    let executor = Arc::new(SleepExecutor::new(Duration::from_millis(1)));
    let runner = LoadRunner::new(executor.clone()).with_sampler(DisabledSampler);

    let invalid = [
        TestConfiguration {
            target_rate: 0.0,
            ..ramp_config("no-rate", 10.0, 1.0)
        },
        TestConfiguration {
            duration_secs: -1.0,
            ..ramp_config("negative", 10.0, 1.0)
        },
        TestConfiguration {
            endpoints: Vec::new(),
            ..ramp_config("no-targets", 10.0, 1.0)
        },
        TestConfiguration {
            max_in_flight: Some(0),
            ..ramp_config("zero-cap", 10.0, 1.0)
        },
    ];

    for config in &invalid {
        let err = runner.run(config).await.unwrap_err();
        assert!(err.is_configuration(), "{}: {}", config.name, err);
    }
    assert_eq!(executor.calls(), 0);
}

// ============================================================================
// Event stream
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_mirror_the_run() {
    let runner = LoadRunner::new(Arc::new(FlakyExecutor::new(4))).with_sampler(DisabledSampler);
    let mut rx = runner.subscribe();

    let config = ramp_config("events", 10.0, 2.0);
    let result = runner.run(&config).await.unwrap();

    let mut progress = Vec::new();
    let mut requests = 0u64;
    let mut errors = 0u64;
    loop {
        match rx.try_recv() {
            Ok(EngineEvent::Progress(update)) => progress.push(update),
            Ok(EngineEvent::Request(_)) => requests += 1,
            Ok(EngineEvent::Error(sample)) => {
                assert!(!sample.success);
                errors += 1;
            }
            Ok(other) => panic!("unexpected event {:?}", other),
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("receiver failed: {}", e),
        }
    }

    assert_eq!(requests, result.total_requests);
    assert_eq!(errors, result.failed_requests);
    assert_eq!(progress.len(), 2);
    assert!(progress.windows(2).all(|w| w[0].elapsed_fraction <= w[1].elapsed_fraction));
    assert!(progress.iter().all(|p| p.elapsed_fraction <= 1.0));
}
