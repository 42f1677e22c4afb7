//! Error types for deployment verification

use std::time::Duration;
use thiserror::Error;

/// Errors raised by pipeline stages.
///
/// Every variant except [`VerifyError::ReportWrite`] is contained by the
/// pipeline and turned into a log entry plus a failed check.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Build command exited non-zero or could not run
    #[error("Build failed: {0}")]
    BuildFailure(String),

    /// Server process could not be spawned
    #[error("Failed to start process `{command}`: {source}")]
    ProcessStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command vector was empty
    #[error("Empty command for {0}")]
    EmptyCommand(&'static str),

    /// Endpoint did not satisfy its contract
    #[error("Probe failed on {endpoint}: {source}")]
    Probe {
        endpoint: &'static str,
        #[source]
        source: ProbeError,
    },

    /// Control endpoint answered 403 without a policy decision
    #[error("Gate mismatch: {0}")]
    GateMismatch(String),

    /// Report artifact could not be persisted
    #[error("Failed to write report {path}: {source}")]
    ReportWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classified failure of a single HTTP probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the per-call timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Response arrived with the wrong status code
    #[error("expected HTTP {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    /// Readiness deadline expired
    #[error("not ready after {attempts} attempt(s) in {waited:?}: {last}")]
    NotReady {
        attempts: u32,
        waited: Duration,
        last: Box<ProbeError>,
    },

    /// HTTP client could not be constructed
    #[error("client error: {0}")]
    Client(String),
}

impl ProbeError {
    /// Classify a reqwest error using the timeout that bounded the call.
    ///
    /// Transport errors keep the whole cause chain, e.g. the OS-level
    /// "Connection refused" underneath reqwest's request error.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Transport(format!("{:#}", anyhow::Error::from(err)))
        }
    }
}

/// Result type for verification operations
pub type Result<T> = std::result::Result<T, VerifyError>;
