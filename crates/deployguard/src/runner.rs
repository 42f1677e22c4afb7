//! Bounded synchronous command execution.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Result of a single command execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    /// Whether the command ran to completion with exit code 0.
    pub success: bool,

    /// Captured stdout (empty if the command never completed).
    pub stdout: String,

    /// Captured stderr (empty if the command never completed).
    pub stderr: String,

    /// Cause when the command could not run or did not finish in time.
    pub error: Option<String>,

    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandResult {
    fn fault(error: String, started: Instant) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
            exit_code: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Best available explanation of a failure: the fault, then stderr.
    pub fn failure_detail(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Render a command vector for messages.
pub fn display_command(command: &[String]) -> String {
    command.join(" ")
}

/// Runs a command once, waiting at most `timeout` for it to finish.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute `command` in `working_dir` and collect its output.
    ///
    /// Never returns an error: spawn failures, I/O faults and timeouts are
    /// folded into a `CommandResult` with `success = false` and `error` set.
    /// A timed-out child is killed when its wait is abandoned.
    pub async fn run(command: &[String], working_dir: &Path, timeout: Duration) -> CommandResult {
        let started = Instant::now();

        let Some((exe, args)) = command.split_first() else {
            return CommandResult::fault("empty command".to_string(), started);
        };

        let child = match Command::new(exe)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return CommandResult::fault(
                    format!(
                        "failed to spawn `{}` in {}: {}",
                        display_command(command),
                        working_dir.display(),
                        e
                    ),
                    started,
                );
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CommandResult::fault(
                    format!("`{}` failed while waiting: {}", display_command(command), e),
                    started,
                );
            }
            Err(_) => {
                return CommandResult::fault(
                    format!(
                        "`{}` timed out after {} seconds",
                        display_command(command),
                        timeout.as_secs_f64()
                    ),
                    started,
                );
            }
        };

        CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            error: None,
            exit_code: output.status.code(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
