//! Verification report model and persistence.

use crate::error::VerifyError;
use crate::log::LogEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use crate::config::REPORT_FILE_NAME;

/// Outcome of the three endpoint checks.
///
/// Every check starts false and can only be marked passed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationOutcome {
    status_endpoint: bool,
    control_endpoint: bool,
    policy_gate: bool,
}

impl ValidationOutcome {
    /// All checks failed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_endpoint(&self) -> bool {
        self.status_endpoint
    }

    pub fn control_endpoint(&self) -> bool {
        self.control_endpoint
    }

    pub fn policy_gate(&self) -> bool {
        self.policy_gate
    }

    pub fn mark_status_endpoint(&mut self) {
        self.status_endpoint = true;
    }

    pub fn mark_control_endpoint(&mut self) {
        self.control_endpoint = true;
    }

    pub fn mark_policy_gate(&mut self) {
        self.policy_gate = true;
    }

    /// Checks as `(name, passed)` pairs in probe order.
    pub fn checks(&self) -> [(&'static str, bool); 3] {
        [
            ("status_endpoint", self.status_endpoint),
            ("control_endpoint", self.control_endpoint),
            ("policy_gate", self.policy_gate),
        ]
    }

    /// Whether every check passed.
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, passed)| *passed)
    }

    /// Names of checks that did not pass.
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks()
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Stage that caused a failed verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    BuildFailed,
    ValidationFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::BuildFailed => "BUILD_FAILED",
            FailureReason::ValidationFailed => "VALIDATION_FAILED",
        }
    }
}

/// Failed verdict, tagged by `reason`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Failure {
    /// Build did not succeed; nothing was validated.
    BuildFailed,

    /// Build succeeded but at least one check failed.
    ValidationFailed { validation: ValidationOutcome },
}

/// Final classification of a run, tagged by `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum Verdict {
    #[serde(rename = "SUCCESS")]
    Success {
        duration_seconds: f64,
        validation: ValidationOutcome,
    },

    #[serde(rename = "FAILED")]
    Failed(Failure),
}

impl Verdict {
    /// Derive the verdict from a validation stage that ran.
    pub fn from_validation(validation: ValidationOutcome, elapsed_secs: f64) -> Self {
        if validation.all_passed() {
            Verdict::Success {
                duration_seconds: round_centis(elapsed_secs),
                validation,
            }
        } else {
            Verdict::Failed(Failure::ValidationFailed { validation })
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Verdict::Success { .. } => "SUCCESS",
            Verdict::Failed(_) => "FAILED",
        }
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Verdict::Success { .. } => None,
            Verdict::Failed(Failure::BuildFailed) => Some(FailureReason::BuildFailed),
            Verdict::Failed(Failure::ValidationFailed { .. }) => {
                Some(FailureReason::ValidationFailed)
            }
        }
    }

    pub fn validation(&self) -> Option<&ValidationOutcome> {
        match self {
            Verdict::Success { validation, .. } => Some(validation),
            Verdict::Failed(Failure::ValidationFailed { validation }) => Some(validation),
            Verdict::Failed(Failure::BuildFailed) => None,
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match self {
            Verdict::Success {
                duration_seconds, ..
            } => Some(*duration_seconds),
            Verdict::Failed(_) => None,
        }
    }
}

fn round_centis(secs: f64) -> f64 {
    (secs.max(0.0) * 100.0).round() / 100.0
}

/// The single artifact a verification run persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Status, reason, duration and validation, per verdict.
    #[serde(flatten)]
    pub verdict: Verdict,

    /// Unique id of this run.
    pub run_id: Uuid,

    /// Project directory the run operated in.
    pub project_path: PathBuf,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the verdict was reached.
    pub finished_at: DateTime<Utc>,

    /// Every log entry, in append order.
    pub logs: Vec<LogEntry>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.verdict.is_success()
    }

    pub fn reason(&self) -> Option<FailureReason> {
        self.verdict.reason()
    }

    pub fn validation(&self) -> Option<&ValidationOutcome> {
        self.verdict.validation()
    }

    /// Process exit code for this verdict.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Writes reports to their well-known location under the project.
pub struct ReportEmitter;

impl ReportEmitter {
    /// Path of the report for `project_path`.
    pub fn report_path(project_path: &Path, file_name: &str) -> PathBuf {
        project_path.join(file_name)
    }

    /// Write `deployment_report.json` under `project_path`, overwriting it.
    pub fn emit(project_path: &Path, report: &Report) -> std::result::Result<PathBuf, VerifyError> {
        let path = Self::report_path(project_path, REPORT_FILE_NAME);
        Self::write(&path, report)?;
        Ok(path)
    }

    /// Write `report` as pretty JSON to `path`.
    pub fn write(path: &Path, report: &Report) -> std::result::Result<(), VerifyError> {
        let mut content = serde_json::to_string_pretty(report)?;
        content.push('\n');
        std::fs::write(path, content).map_err(|source| VerifyError::ReportWrite {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read a previously written report.
    pub fn load(path: &Path) -> Result<Report> {
        let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parse report {:?}", path))
    }
}
