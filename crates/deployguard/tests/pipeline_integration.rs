//! Integration tests for the verification pipeline against real processes
//! and a mock application server.

use async_trait::async_trait;
use deployguard::config::ReadinessPolicy;
use deployguard::probe::{ControlOutcome, EndpointProber, ReadyInfo, CONTROL_PATH, STATUS_PATH};
use deployguard::report::REPORT_FILE_NAME;
use deployguard::{
    FailureReason, LogLevel, ProbeError, Prober, ReportEmitter, VerificationPipeline, VerifyConfig,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn fast_readiness() -> ReadinessPolicy {
    ReadinessPolicy {
        timeout_ms: 500,
        initial_interval_ms: 50,
        max_interval_ms: 100,
        attempt_timeout_ms: 200,
    }
}

/// Build passes, server is a placeholder process; probes hit `base_url`.
fn config(base_url: &str) -> VerifyConfig {
    VerifyConfig::default()
        .with_build_command(sh("exit 0"))
        .with_server_command(vec!["sleep".to_string(), "30".to_string()])
        .with_base_url(base_url)
        .with_probe_timeout_ms(2_000)
        .with_stop_grace_ms(5_000)
        .with_readiness(fast_readiness())
}

async fn mock_app(status: u16, control: u16, control_body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CONTROL_PATH))
        .respond_with(ResponseTemplate::new(control).set_body_json(control_body))
        .mount(&server)
        .await;
    server
}

fn refused_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn pipeline(dir: &Path, config: VerifyConfig) -> VerificationPipeline {
    VerificationPipeline::new(dir, config)
        .expect("pipeline")
        .quiet()
}

/// Scenario 1: build exits 1
#[tokio::test]
async fn test_build_failure_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&refused_base_url())
        .with_build_command(sh("echo 'Type error in page.tsx' >&2; exit 1"))
        .with_server_command(sh("touch server-started; sleep 30"));

    let report = pipeline(dir.path(), config).run().await;

    assert!(!report.is_success());
    assert_eq!(report.reason(), Some(FailureReason::BuildFailed));
    assert!(report.validation().is_none());
    assert!(!dir.path().join("server-started").exists(), "server must not start");

    let v = serde_json::to_value(&report).unwrap();
    assert_eq!(v["status"], "FAILED");
    assert_eq!(v["reason"], "BUILD_FAILED");
    assert!(v.get("validation").is_none());
}

/// Scenario 2: clean success
#[tokio::test]
async fn test_clean_success_report() {
    let app = mock_app(200, 403, json!({"decision": "deny"})).await;
    let dir = tempfile::tempdir().unwrap();

    let report = pipeline(dir.path(), config(&app.uri())).run().await;

    assert!(report.is_success(), "logs: {:#?}", report.logs);
    let v = serde_json::to_value(&report).unwrap();
    assert_eq!(v["status"], "SUCCESS");
    assert_eq!(
        v["validation"],
        json!({"status_endpoint": true, "control_endpoint": true, "policy_gate": true})
    );
    assert!(v["duration_seconds"].as_f64().unwrap() >= 0.0);
    assert_eq!(report.logs.last().unwrap().level, LogLevel::Success);
}

/// Scenario 3: 403 without a decision
#[tokio::test]
async fn test_policy_gate_silent() {
    let app = mock_app(200, 403, json!({"error": "forbidden"})).await;
    let dir = tempfile::tempdir().unwrap();

    let report = pipeline(dir.path(), config(&app.uri())).run().await;

    assert_eq!(report.reason(), Some(FailureReason::ValidationFailed));
    let v = serde_json::to_value(&report).unwrap();
    assert_eq!(v["status"], "FAILED");
    assert_eq!(v["reason"], "VALIDATION_FAILED");
    assert_eq!(v["validation"]["status_endpoint"], true);
    assert_eq!(v["validation"]["control_endpoint"], true);
    assert_eq!(v["validation"]["policy_gate"], false);
    assert_eq!(report.logs.last().unwrap().level, LogLevel::Error);
}

/// Scenario 4: nothing listens on the base URL
#[tokio::test]
async fn test_server_never_comes_up() {
    let dir = tempfile::tempdir().unwrap();

    let report = pipeline(dir.path(), config(&refused_base_url())).run().await;

    let v = serde_json::to_value(&report).unwrap();
    assert_eq!(v["status"], "FAILED");
    assert_eq!(
        v["validation"],
        json!({"status_endpoint": false, "control_endpoint": false, "policy_gate": false})
    );
    assert!(report
        .logs
        .iter()
        .any(|e| e.message.starts_with("Server not ready")));
    // Both probes are attempted and recorded.
    let probe_errors = report
        .logs
        .iter()
        .filter(|e| e.level == LogLevel::Error && e.message.starts_with("Probe failed"))
        .count();
    assert_eq!(probe_errors, 2);
}

#[tokio::test]
async fn test_control_endpoint_allowing_deploy_fails() {
    let app = mock_app(200, 200, json!({"success": true, "decision": {"allowed": true}})).await;
    let dir = tempfile::tempdir().unwrap();

    let report = pipeline(dir.path(), config(&app.uri())).run().await;

    let validation = report.validation().unwrap();
    assert!(validation.status_endpoint());
    assert!(!validation.control_endpoint());
    assert!(!validation.policy_gate());
}

#[tokio::test]
async fn test_runs_are_idempotent() {
    let app = mock_app(200, 403, json!({"error": "forbidden"})).await;
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), config(&app.uri()));

    let first = p.run().await;
    let second = p.run().await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.verdict.status(), second.verdict.status());
    assert_eq!(first.reason(), second.reason());
    assert_eq!(first.validation(), second.validation());
    assert_eq!(first.logs.len(), second.logs.len());
}

/// Waits for the server to record its pid, then probes over HTTP.
struct PidFileProber {
    pid_file: PathBuf,
    inner: EndpointProber,
}

#[async_trait]
impl Prober for PidFileProber {
    async fn wait_until_ready(
        &self,
        base_url: &str,
        policy: &ReadinessPolicy,
    ) -> Result<ReadyInfo, ProbeError> {
        for _ in 0..100 {
            if self.pid_file.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.wait_until_ready(base_url, policy).await
    }

    async fn probe_status(&self, base_url: &str, timeout: Duration) -> Result<(), ProbeError> {
        self.inner.probe_status(base_url, timeout).await
    }

    async fn probe_control(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<ControlOutcome, ProbeError> {
        self.inner.probe_control(base_url, timeout).await
    }
}

#[tokio::test]
async fn test_server_process_is_terminated() {
    let app = mock_app(500, 500, json!({})).await;
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("server.pid");
    let config = config(&app.uri()).with_server_command(sh("echo $$ > server.pid; exec sleep 60"));

    let prober = PidFileProber {
        pid_file: pid_file.clone(),
        inner: EndpointProber::new().unwrap(),
    };
    let report = VerificationPipeline::with_prober(dir.path(), config, Arc::new(prober))
        .quiet()
        .run()
        .await;

    assert_eq!(report.reason(), Some(FailureReason::ValidationFailed));
    let stops = report
        .logs
        .iter()
        .filter(|e| e.message.starts_with("Server stopped"))
        .count();
    assert_eq!(stops, 1, "server must be stopped exactly once");

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    assert!(!alive, "server process {} still running", pid.trim());
}

#[tokio::test]
async fn test_report_emitted_at_project_root() {
    let app = mock_app(200, 403, json!({"decision": {"allowed": false}})).await;
    let dir = tempfile::tempdir().unwrap();

    let report = pipeline(dir.path(), config(&app.uri())).run().await;
    let path = ReportEmitter::emit(dir.path(), &report).unwrap();

    assert_eq!(path, dir.path().join(REPORT_FILE_NAME));
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["status"], "SUCCESS");
    let logs = raw["logs"].as_array().unwrap();
    assert!(!logs.is_empty());
    for entry in logs {
        assert!(entry["timestamp"].is_string());
        assert!(entry["level"].is_string());
        assert!(entry["message"].is_string());
    }
}

/// Whether `pid` is a live (non-zombie) process.
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_server_forked_children_are_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    let config = config(&refused_base_url())
        .with_server_command(sh("sleep 60 & echo $! > child.pid; wait"));

    let prober = PidFileProber {
        pid_file: pid_file.clone(),
        inner: EndpointProber::new().unwrap(),
    };
    let report = VerificationPipeline::with_prober(dir.path(), config, Arc::new(prober))
        .quiet()
        .run()
        .await;

    assert_eq!(report.reason(), Some(FailureReason::ValidationFailed));
    assert!(report
        .logs
        .iter()
        .any(|e| e.message.starts_with("Server stopped")));

    let child_pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let mut alive = process_alive(child_pid);
    for _ in 0..40 {
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        alive = process_alive(child_pid);
    }
    assert!(!alive, "server's forked child {} still running", child_pid);
}
