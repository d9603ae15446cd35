//! Error types for the load engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

/// Fatal errors raised by a run.
///
/// Per-request and per-sample failures never surface here; they are folded
/// into the run statistics instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to read configuration file {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    /// Whether the error was raised before any traffic was issued.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration(_) | EngineError::ConfigFile { .. }
        )
    }
}

/// Failure to persist a finished report.
///
/// The result that was being written stays valid; only the write failed.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to create report directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("No free report key for {0} after repeated collisions")]
    KeyExhausted(String),
}
