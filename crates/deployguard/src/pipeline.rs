//! Verification pipeline: build, boot, probe, verdict.

use crate::config::{ReadinessPolicy, VerifyConfig};
use crate::error::{ProbeError, VerifyError};
use crate::log::RunLog;
use crate::probe::{ControlOutcome, EndpointProber, ReadyInfo, CONTROL_PATH, STATUS_PATH};
use crate::report::{Failure, Report, ValidationOutcome, Verdict};
use crate::runner::{display_command, CommandRunner};
use crate::supervisor::ProcessSupervisor;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// HTTP checks the pipeline runs against the booted application.
///
/// [`EndpointProber`] is the production implementation.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn wait_until_ready(
        &self,
        base_url: &str,
        policy: &ReadinessPolicy,
    ) -> Result<ReadyInfo, ProbeError>;

    async fn probe_status(&self, base_url: &str, timeout: Duration) -> Result<(), ProbeError>;

    async fn probe_control(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<ControlOutcome, ProbeError>;
}

#[async_trait]
impl Prober for EndpointProber {
    async fn wait_until_ready(
        &self,
        base_url: &str,
        policy: &ReadinessPolicy,
    ) -> Result<ReadyInfo, ProbeError> {
        EndpointProber::wait_until_ready(self, base_url, policy).await
    }

    async fn probe_status(&self, base_url: &str, timeout: Duration) -> Result<(), ProbeError> {
        EndpointProber::probe_status(self, base_url, timeout).await
    }

    async fn probe_control(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<ControlOutcome, ProbeError> {
        EndpointProber::probe_control(self, base_url, timeout).await
    }
}

/// Pipeline state machine: `Init -> Build -> Validate -> {Success, Failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Build,
    Validate,
    Success,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Success | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "INIT",
            PipelineState::Build => "BUILD",
            PipelineState::Validate => "VALIDATE",
            PipelineState::Success => "SUCCESS",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Sequences build, server start, probes and verdict for one project.
///
/// Stages never propagate errors: every failure becomes a log entry and a
/// failed check, and every run yields a [`Report`].
pub struct VerificationPipeline {
    project_path: PathBuf,
    config: VerifyConfig,
    prober: Arc<dyn Prober>,
    log: RunLog,
    state: PipelineState,
}

impl VerificationPipeline {
    /// Create a pipeline for `project_path` using the HTTP prober.
    pub fn new(
        project_path: impl Into<PathBuf>,
        config: VerifyConfig,
    ) -> Result<Self, VerifyError> {
        let prober = EndpointProber::new().map_err(|source| VerifyError::Probe {
            endpoint: "http client",
            source,
        })?;
        Ok(Self::with_prober(project_path, config, Arc::new(prober)))
    }

    /// Create a pipeline with a custom prober.
    pub fn with_prober(
        project_path: impl Into<PathBuf>,
        config: VerifyConfig,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            project_path: project_path.into(),
            config,
            prober,
            log: RunLog::new(),
            state: PipelineState::Init,
        }
    }

    /// Stop mirroring log entries to stdout.
    pub fn quiet(mut self) -> Self {
        self.log = RunLog::quiet();
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Execute one verification run and return its report.
    pub async fn run(&mut self) -> Report {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at = Utc::now();
        self.log = self.log.fresh();

        self.transition(PipelineState::Init);
        info!(
            run_id = %run_id,
            project = %self.project_path.display(),
            "Starting verification run"
        );
        self.log.info("=== DEPLOYMENT AGENT STARTED ===");

        self.transition(PipelineState::Build);
        if !self.build().await {
            self.transition(PipelineState::Failed);
            self.log.error("=== FAILED: BUILD_FAILED ===");
            return self.finish(run_id, started_at, Verdict::Failed(Failure::BuildFailed));
        }

        self.transition(PipelineState::Validate);
        let validation = self.validate().await;

        let verdict = Verdict::from_validation(validation, started.elapsed().as_secs_f64());
        match verdict.duration_seconds() {
            Some(duration) => {
                self.transition(PipelineState::Success);
                self.log
                    .success(format!("=== COMPLETED IN {:.2}s ===", duration));
            }
            None => {
                self.transition(PipelineState::Failed);
                self.log.error(format!(
                    "=== FAILED: VALIDATION_FAILED ({}) ===",
                    validation.failed_checks().join(", ")
                ));
            }
        }

        self.finish(run_id, started_at, verdict)
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
    }

    fn finish(
        &mut self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        verdict: Verdict,
    ) -> Report {
        info!(run_id = %run_id, status = verdict.status(), "Verification run finished");
        let next = self.log.fresh();
        let logs = std::mem::replace(&mut self.log, next).into_entries();
        Report {
            verdict,
            run_id,
            project_path: self.project_path.clone(),
            started_at,
            finished_at: Utc::now(),
            logs,
        }
    }

    /// BUILD stage. Returns whether the build succeeded.
    async fn build(&mut self) -> bool {
        let command = &self.config.build_command;
        self.log.info(format!(
            "Step 1: Running build `{}`...",
            display_command(command)
        ));

        let result =
            CommandRunner::run(command, &self.project_path, self.config.build_timeout()).await;

        if result.success {
            self.log.success(format!(
                "Build succeeded in {:.2}s [OK]",
                result.duration_ms as f64 / 1000.0
            ));
            true
        } else {
            let err = VerifyError::BuildFailure(result.failure_detail());
            self.log.error(err.to_string());
            false
        }
    }

    /// VALIDATE stage. The server is stopped on every path out of here.
    async fn validate(&mut self) -> ValidationOutcome {
        let mut validation = ValidationOutcome::new();

        self.log.info(format!(
            "Step 2: Starting server `{}`...",
            display_command(&self.config.server_command)
        ));
        let handle = match ProcessSupervisor::start(&self.config.server_command, &self.project_path)
        {
            Ok(handle) => handle,
            Err(e) => {
                self.log.error(format!("Server error: {}", e));
                return validation;
            }
        };
        self.log.info(format!(
            "Server started (pid {}), waiting for {}",
            handle
                .pid()
                .map_or_else(|| "?".to_string(), |p| p.to_string()),
            self.config.base_url
        ));

        let probes = AssertUnwindSafe(self.run_probes(&mut validation))
            .catch_unwind()
            .await;
        if let Err(panic) = probes {
            self.log
                .error(format!("Probe stage faulted: {}", panic_message(panic.as_ref())));
        }

        let stopped = handle.stop(self.config.stop_grace()).await;
        if stopped.is_clean() {
            self.log.info(format!("Server stopped: {}", stopped));
        } else {
            self.log.error(format!("Server stop incomplete: {}", stopped));
        }

        validation
    }

    async fn run_probes(&mut self, validation: &mut ValidationOutcome) {
        let base_url = self.config.base_url.clone();
        let timeout = self.config.probe_timeout();

        match self
            .prober
            .wait_until_ready(&base_url, &self.config.readiness)
            .await
        {
            Ok(ready) => self.log.info(format!(
                "Server ready after {} attempt(s) in {:.2}s",
                ready.attempts,
                ready.waited.as_secs_f64()
            )),
            Err(e) => self.log.error(format!("Server not ready: {}", e)),
        }

        match self.prober.probe_status(&base_url, timeout).await {
            Ok(()) => {
                validation.mark_status_endpoint();
                self.log.success("Status endpoint [OK]");
            }
            Err(source) => {
                let err = VerifyError::Probe {
                    endpoint: STATUS_PATH,
                    source,
                };
                self.log.error(err.to_string());
            }
        }

        match self.prober.probe_control(&base_url, timeout).await {
            Ok(outcome) => {
                if outcome.control_ok {
                    validation.mark_control_endpoint();
                    self.log
                        .success("Control endpoint rejected ungated deploy with 403 [OK]");
                }
                if outcome.policy_gate_ok {
                    validation.mark_policy_gate();
                    let message = match outcome.decision_summary() {
                        Some(summary) => format!("Policy gate [OK] {}", summary),
                        None => "Policy gate [OK]".to_string(),
                    };
                    self.log.success(message);
                } else {
                    let detail = outcome
                        .gate_detail
                        .unwrap_or_else(|| "no policy decision returned".to_string());
                    self.log.error(VerifyError::GateMismatch(detail).to_string());
                }
            }
            Err(source) => {
                let err = VerifyError::Probe {
                    endpoint: CONTROL_PATH,
                    source,
                };
                self.log.error(err.to_string());
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
