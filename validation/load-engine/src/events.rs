//! Live notification channel.
//!
//! Events are for observation only: nothing in the engine reads them back,
//! there is no acknowledgment, and a receiver that falls behind simply
//! misses events (`RecvError::Lagged`).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::metrics::SampleRecord;
use crate::stress::LoadStep;

const DEFAULT_CAPACITY: usize = 1024;

/// Progress snapshot emitted once per second.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ProgressUpdate {
    pub elapsed_fraction: f64,
    /// Completed requests per elapsed second.
    pub current_rate: f64,
    pub error_rate: f64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub in_flight: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Progress(ProgressUpdate),
    /// Every completed request.
    Request(SampleRecord),
    /// Failed requests, in addition to their `Request` event.
    Error(SampleRecord),
    StepStarted { step: usize, target_rate: f64 },
    StepComplete(Box<LoadStep>),
}

/// Broadcast publisher shared by the runner and controllers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    pub fn publish(&self, event: EngineEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    /// Publish the per-request events for one completed sample.
    pub(crate) fn publish_sample(&self, sample: &SampleRecord) {
        if !self.has_subscribers() {
            return;
        }
        if !sample.success {
            self.publish(EngineEvent::Error(sample.clone()));
        }
        self.publish(EngineEvent::Request(sample.clone()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
