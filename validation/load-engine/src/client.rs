//! The request primitive: issue one request, time it, classify it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};
use crate::metrics::SampleRecord;
use crate::selection::RequestTarget;

/// Outcome of a single request as reported by an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub status: Option<u16>,
    pub bytes: u64,
    pub error: Option<String>,
}

impl RequestOutcome {
    pub fn ok(status: u16, bytes: u64) -> Self {
        Self {
            status: Some(status),
            bytes,
            error: None,
        }
    }

    pub fn failed(status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status,
            bytes: 0,
            error: Some(error.into()),
        }
    }

    /// No transport error and a 2xx status.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(200..=299))
    }
}

/// Issues one unit of load against a target.
///
/// Implementations must not panic on network failure; every failure is an
/// outcome.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, target: &RequestTarget) -> RequestOutcome;
}

/// reqwest-backed executor.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::ClientSetup(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, target: &RequestTarget) -> RequestOutcome {
        let response = match self
            .client
            .request(target.method.clone(), &target.url)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RequestOutcome::failed(e.status().map(|s| s.as_u16()), e.to_string()),
        };

        let status = response.status();

        // Drain the body so latency covers the full response
        let bytes = match response.bytes().await {
            Ok(b) => b.len() as u64,
            Err(e) => return RequestOutcome::failed(Some(status.as_u16()), e.to_string()),
        };

        if status.is_success() {
            RequestOutcome::ok(status.as_u16(), bytes)
        } else {
            RequestOutcome {
                status: Some(status.as_u16()),
                bytes,
                error: Some(format!("HTTP {}", status.as_u16())),
            }
        }
    }
}

/// Issue one request and turn it into a sample.
///
/// Latency is measured here rather than by the executor so every run mode
/// times requests the same way.
pub async fn issue_request(
    executor: &dyn RequestExecutor,
    target: &RequestTarget,
    run_start: Instant,
) -> SampleRecord {
    let start = Instant::now();
    let outcome = executor.execute(target).await;
    let latency = start.elapsed();

    SampleRecord {
        target: target.id.clone(),
        latency_ms: latency.as_secs_f64() * 1000.0,
        success: outcome.is_success(),
        status: outcome.status,
        error: outcome.error,
        bytes: outcome.bytes,
        offset_ms: start.duration_since(run_start).as_secs_f64() * 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert!(RequestOutcome::ok(200, 10).is_success());
        assert!(RequestOutcome::ok(204, 0).is_success());
        assert!(!RequestOutcome::ok(503, 0).is_success());
        assert!(!RequestOutcome::failed(None, "connection refused").is_success());
        assert!(!RequestOutcome::failed(Some(200), "body truncated").is_success());
    }
}
