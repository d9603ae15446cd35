//! End-to-end tests of the reqwest executor against a local axum server.

mod common;

use axum::{http::StatusCode, routing::get, Router};
use common::scenario;
use load_engine::{
    DisabledSampler, HttpExecutor, LoadRunner, RequestExecutor, RequestTarget, TestConfiguration,
};
use reqwest::Method;
use std::net::SocketAddr;
use std::time::Duration;

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { "hello" }))
        .route(
            "/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "late"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn target(addr: SocketAddr, path: &str) -> RequestTarget {
    RequestTarget {
        id: path.to_string(),
        url: format!("http://{}{}", addr, path),
        method: Method::GET,
    }
}

// ============================================================================
// Executor classification
// ============================================================================

#[tokio::test]
async fn test_success_drains_body() {
    let addr = spawn_server().await;
    let executor = HttpExecutor::new(Duration::from_secs(2)).unwrap();

    let outcome = executor.execute(&target(addr, "/ok")).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.bytes, 5);
}

#[tokio::test]
async fn test_server_error_is_a_failure() {
    let addr = spawn_server().await;
    let executor = HttpExecutor::new(Duration::from_secs(2)).unwrap();

    let outcome = executor.execute(&target(addr, "/fail")).await;
    assert!(!outcome.is_success());
    assert_eq!(outcome.status, Some(500));
    assert_eq!(outcome.error.as_deref(), Some("HTTP 500"));
}

#[tokio::test]
async fn test_timeout_is_a_failure() {
    let addr = spawn_server().await;
    let executor = HttpExecutor::new(Duration::from_millis(100)).unwrap();

    let outcome = executor.execute(&target(addr, "/slow")).await;
    assert!(!outcome.is_success());
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn test_connection_refused_is_a_failure() {
    // Bind and release a port so nothing is listening on it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = HttpExecutor::new(Duration::from_secs(1)).unwrap();
    let outcome = executor.execute(&target(addr, "/ok")).await;
    assert!(!outcome.is_success());
    assert_eq!(outcome.status, None);
    assert!(outcome.error.is_some());
}

// ============================================================================
// Full run
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_run_splits_by_scenario() {
    let addr = spawn_server().await;
    let config = TestConfiguration {
        name: "http".to_string(),
        base_url: Some(format!("http://{}", addr)),
        duration_secs: 1.0,
        target_rate: 40.0,
        scenarios: vec![scenario("ok", "/ok", 50.0), scenario("fail", "/fail", 50.0)],
        seed: Some(11),
        request_timeout_secs: 2.0,
        ..TestConfiguration::default()
    };

    let runner = LoadRunner::http(&config).unwrap().with_sampler(DisabledSampler);
    let result = runner.run(&config).await.unwrap();

    assert!(result.total_requests >= 30, "issued {}", result.total_requests);
    assert!(result.failed_requests > 0);
    assert!(result.successful_requests > 0);
    assert!(
        result.error_rate > 0.2 && result.error_rate < 0.8,
        "error rate {}",
        result.error_rate
    );
    // Successful responses carry a 5-byte body
    assert!(result.bytes_received >= result.successful_requests * 5);
    assert!(!result.passed);
}
