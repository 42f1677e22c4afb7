//! Verification run configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base URL of the application under test.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Report file written at the project root.
pub const REPORT_FILE_NAME: &str = "deployment_report.json";

/// Backoff policy for waiting on the status endpoint after server start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadinessPolicy {
    /// Overall deadline in milliseconds.
    pub timeout_ms: u64,

    /// Delay before the second attempt (milliseconds).
    pub initial_interval_ms: u64,

    /// Upper bound for the delay between attempts (milliseconds).
    pub max_interval_ms: u64,

    /// Per-attempt request timeout (milliseconds).
    pub attempt_timeout_ms: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            initial_interval_ms: 250,
            max_interval_ms: 2_000,
            attempt_timeout_ms: 5_000,
        }
    }
}

impl ReadinessPolicy {
    /// Overall deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Per-attempt request timeout.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay to sleep after the given (1-based) failed attempt.
    ///
    /// Doubles from `initial_interval_ms`, capped at `max_interval_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_interval_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_interval_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for one verification run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyConfig {
    /// Build command (first element is executable).
    pub build_command: Vec<String>,

    /// Server command, left running while probes execute.
    pub server_command: Vec<String>,

    /// Base URL the probes target.
    pub base_url: String,

    /// Build timeout in seconds.
    pub build_timeout_secs: u64,

    /// Timeout for each status/control probe (milliseconds).
    pub probe_timeout_ms: u64,

    /// How long to wait for the killed server to be reaped (milliseconds).
    pub stop_grace_ms: u64,

    /// Readiness polling policy.
    pub readiness: ReadinessPolicy,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            build_command: vec!["npm".to_string(), "run".to_string(), "build".to_string()],
            server_command: vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
            base_url: DEFAULT_BASE_URL.to_string(),
            build_timeout_secs: 300,
            probe_timeout_ms: 5_000,
            stop_grace_ms: 10_000,
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl VerifyConfig {
    /// Override the build command.
    pub fn with_build_command(mut self, command: Vec<String>) -> Self {
        self.build_command = command;
        self
    }

    /// Override the server command.
    pub fn with_server_command(mut self, command: Vec<String>) -> Self {
        self.server_command = command;
        self
    }

    /// Override the base URL. A trailing slash is dropped.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the build timeout.
    pub fn with_build_timeout_secs(mut self, secs: u64) -> Self {
        self.build_timeout_secs = secs;
        self
    }

    /// Override the per-probe timeout.
    pub fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    /// Override the stop grace period.
    pub fn with_stop_grace_ms(mut self, ms: u64) -> Self {
        self.stop_grace_ms = ms;
        self
    }

    /// Override the readiness policy.
    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Split a whitespace-separated command line into argv.
pub fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
