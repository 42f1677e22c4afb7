//! Diagnostic logging for `deployguard` runs.
//!
//! A run has two output channels. Stdout belongs to the run log: every
//! [`RunLog`](crate::log::RunLog) entry is mirrored there as
//! `[LEVEL] message`, followed by the `Report:` line. Diagnostics (process
//! spawns, readiness backoff, stop outcomes) go through `tracing` to stderr,
//! so piping stdout into a CI step summary never picks them up.
//!
//! Run log entries are also emitted as DEBUG events. `--verbose` therefore
//! interleaves them with the diagnostics, timestamped, on stderr. `--json`
//! makes stderr newline-delimited JSON for log shippers.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for diagnostic log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

impl LogFormat {
    /// Format selected by the `--json` flag.
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Pick the default verbosity from the `--verbose` flag.
pub fn default_level(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// `RUST_LOG` if set and valid, else `level` for everything.
fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the stderr subscriber. Later calls in the same process are no-ops.
pub fn init_tracing(format: LogFormat, level: Level) {
    let registry = tracing_subscriber::registry().with(filter(level));

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
