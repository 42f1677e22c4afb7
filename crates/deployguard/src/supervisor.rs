//! Long-running process launch and guaranteed termination.
//!
//! On unix the server runs as the leader of its own process group, so
//! stopping it also takes down whatever it forked (the real dev server
//! behind an `npm run dev` wrapper, for instance).

use crate::error::{Result, VerifyError};
use crate::runner::display_command;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Launches the application server without waiting on it.
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Spawn `command` in `working_dir` and return immediately.
    ///
    /// Output streams are piped but never drained. The process group is
    /// also killed if the handle is dropped without calling
    /// [`ProcessHandle::stop`].
    pub fn start(command: &[String], working_dir: &Path) -> Result<ProcessHandle> {
        let (exe, args) = command
            .split_first()
            .ok_or(VerifyError::EmptyCommand("server"))?;
        let rendered = display_command(command);

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| VerifyError::ProcessStart {
            command: rendered.clone(),
            source,
        })?;

        debug!(pid = ?child.id(), command = %rendered, "Spawned supervised process");

        Ok(ProcessHandle {
            child,
            command: rendered,
            signalled: false,
        })
    }
}

/// Owned handle to a supervised process. Consumed by [`ProcessHandle::stop`].
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    command: String,
    signalled: bool,
}

/// How a stop request resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Process was reaped within the grace period.
    Exited {
        pid: Option<u32>,
        exit_code: Option<i32>,
    },

    /// Process was still not reaped when the grace period ran out.
    GraceExpired { pid: Option<u32>, grace: Duration },

    /// Waiting on the process failed.
    Failed { pid: Option<u32>, error: String },
}

impl StopOutcome {
    /// Whether the process is known to be gone.
    pub fn is_clean(&self) -> bool {
        matches!(self, StopOutcome::Exited { .. })
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pid = |pid: &Option<u32>| pid.map_or_else(|| "?".to_string(), |p| p.to_string());
        match self {
            StopOutcome::Exited { pid: p, exit_code } => match exit_code {
                Some(code) => write!(f, "process {} exited with code {}", pid(p), code),
                None => write!(f, "process {} terminated", pid(p)),
            },
            StopOutcome::GraceExpired { pid: p, grace } => write!(
                f,
                "process {} did not exit within {:.1}s grace period",
                pid(p),
                grace.as_secs_f64()
            ),
            StopOutcome::Failed { pid: p, error } => {
                write!(f, "failed to stop process {}: {}", pid(p), error)
            }
        }
    }
}

impl ProcessHandle {
    /// OS process id (None once reaped).
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// The command line this process was started with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Force-kill the process and its group, then wait at most `grace` for
    /// the process to be reaped.
    ///
    /// Always returns; a process that outlives the grace period is reported,
    /// not waited on.
    pub async fn stop(mut self, grace: Duration) -> StopOutcome {
        let pid = self.child.id();
        self.kill_tree();

        let outcome = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => StopOutcome::Exited {
                pid,
                exit_code: status.code(),
            },
            Ok(Err(e)) => StopOutcome::Failed {
                pid,
                error: e.to_string(),
            },
            Err(_) => StopOutcome::GraceExpired { pid, grace },
        };

        if !outcome.is_clean() {
            warn!(command = %self.command, "{}", outcome);
        }
        outcome
    }

    /// SIGKILL the whole process group, falling back to the direct child.
    fn kill_tree(&mut self) {
        self.signalled = true;

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                match kill_group(pid) {
                    Ok(()) => return,
                    Err(e) => debug!(pid, error = %e, "Process group kill failed"),
                }
            }
        }

        // Fails when the child is already gone; a later wait still reaps it.
        if let Err(e) = self.child.start_kill() {
            debug!(pid = ?self.child.id(), error = %e, "Kill signal not delivered");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.signalled {
            self.kill_tree();
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) -> nix::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(pid as i32);
    killpg(group, Signal::SIGKILL)
}
