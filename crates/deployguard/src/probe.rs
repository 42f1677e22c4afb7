//! HTTP probes against the application under test.
//!
//! Probes are pure classifiers: they issue one bounded request and return a
//! typed result. Logging the outcome is left to the caller.

use crate::config::ReadinessPolicy;
use crate::error::ProbeError;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

/// Status endpoint path.
pub const STATUS_PATH: &str = "/api/status";

/// Control endpoint path.
pub const CONTROL_PATH: &str = "/api/control";

/// Status code the control endpoint must answer an ungated deploy with.
pub const CONTROL_EXPECTED_STATUS: u16 = 403;

/// Key that carries the policy decision in the control response body.
pub const DECISION_KEY: &str = "decision";

/// Body posted to the control endpoint.
pub fn control_request_body() -> Value {
    json!({ "type": "deploy", "target": "test" })
}

/// Classified response of the control endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutcome {
    /// Endpoint rejected the request with 403.
    pub control_ok: bool,

    /// Response body carried a `decision` key.
    pub policy_gate_ok: bool,

    /// The decision payload, if present.
    pub decision: Option<Value>,

    /// Why the gate check failed, if it did.
    pub gate_detail: Option<String>,
}

impl ControlOutcome {
    /// Short summary of a policy decision for log messages.
    ///
    /// Reads the `allowed` and `reason` fields when the decision is an object.
    pub fn decision_summary(&self) -> Option<String> {
        let decision = self.decision.as_ref()?;
        let allowed = decision.get("allowed").and_then(Value::as_bool);
        let reason = decision.get("reason").and_then(Value::as_str);
        match (allowed, reason) {
            (Some(a), Some(r)) => Some(format!("allowed={} reason={}", a, r)),
            (Some(a), None) => Some(format!("allowed={}", a)),
            (None, Some(r)) => Some(format!("reason={}", r)),
            (None, None) => Some(decision.to_string()),
        }
    }
}

/// Result of a successful readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyInfo {
    /// Number of requests issued, including the one that succeeded.
    pub attempts: u32,

    /// Time spent waiting.
    pub waited: Duration,
}

/// Issues bounded HTTP probes. Holds a reusable client.
#[derive(Debug, Clone)]
pub struct EndpointProber {
    client: reqwest::Client,
}

impl EndpointProber {
    /// Create a prober. Proxies are bypassed; probes target a local process.
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("deployguard/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    async fn fetch_status(&self, base_url: &str, timeout: Duration) -> Result<u16, ProbeError> {
        let response = self
            .client
            .get(Self::url(base_url, STATUS_PATH))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, timeout))?;
        Ok(response.status().as_u16())
    }

    /// GET `/api/status`; Ok iff answered with exactly 200 within `timeout`.
    pub async fn probe_status(&self, base_url: &str, timeout: Duration) -> Result<(), ProbeError> {
        match self.fetch_status(base_url, timeout).await? {
            200 => Ok(()),
            actual => Err(ProbeError::UnexpectedStatus {
                expected: 200,
                actual,
            }),
        }
    }

    /// POST an ungated deploy to `/api/control` and classify the rejection.
    ///
    /// Any status other than 403 is an error. On 403 the body is inspected for
    /// a top-level `decision` key; an unreadable or non-JSON body fails only
    /// the gate check.
    pub async fn probe_control(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<ControlOutcome, ProbeError> {
        let response = self
            .client
            .post(Self::url(base_url, CONTROL_PATH))
            .timeout(timeout)
            .json(&control_request_body())
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, timeout))?;

        let actual = response.status().as_u16();
        if actual != CONTROL_EXPECTED_STATUS {
            return Err(ProbeError::UnexpectedStatus {
                expected: CONTROL_EXPECTED_STATUS,
                actual,
            });
        }

        let (decision, gate_detail) = match response.bytes().await {
            Ok(body) => match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(mut map)) => match map.remove(DECISION_KEY) {
                    Some(decision) => (Some(decision), None),
                    None => (None, Some("response has no `decision` field".to_string())),
                },
                Ok(_) => (None, Some("response body is not a JSON object".to_string())),
                Err(e) => (None, Some(format!("response body is not JSON: {}", e))),
            },
            Err(e) => (
                None,
                Some(format!(
                    "failed to read response body: {}",
                    ProbeError::from_reqwest(e, timeout)
                )),
            ),
        };

        Ok(ControlOutcome {
            control_ok: true,
            policy_gate_ok: decision.is_some(),
            decision,
            gate_detail,
        })
    }

    /// Poll the status endpoint until the server answers or `policy` times out.
    ///
    /// Any HTTP response counts as ready; classifying the status code is left
    /// to [`EndpointProber::probe_status`]. Attempts back off exponentially.
    pub async fn wait_until_ready(
        &self,
        base_url: &str,
        policy: &ReadinessPolicy,
    ) -> Result<ReadyInfo, ProbeError> {
        let started = Instant::now();
        let deadline = started + policy.timeout();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt_timeout = policy
                .attempt_timeout()
                .min(remaining)
                .max(Duration::from_millis(1));

            let last = match self.fetch_status(base_url, attempt_timeout).await {
                Ok(_) => {
                    return Ok(ReadyInfo {
                        attempts,
                        waited: started.elapsed(),
                    })
                }
                Err(e) => e,
            };

            let delay = policy.backoff(attempts);
            if Instant::now() + delay >= deadline {
                return Err(ProbeError::NotReady {
                    attempts,
                    waited: started.elapsed(),
                    last: Box::new(last),
                });
            }
            tracing::debug!(
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last,
                "Server not ready yet"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
