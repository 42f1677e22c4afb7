//! Ordered, timestamped run log owned by a single pipeline run.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// Wall-clock time the entry was created.
    pub timestamp: DateTime<Utc>,

    /// Entry severity.
    pub level: LogLevel,

    /// Human-readable message.
    pub message: String,
}

/// Append-only log of a verification run.
///
/// Each appended entry is printed as `[LEVEL] message` and emitted as a
/// debug-level `tracing` event at the moment it is recorded. Timestamps are
/// strictly increasing in append order.
#[derive(Debug)]
pub struct RunLog {
    entries: Vec<LogEntry>,
    echo: bool,
}

impl RunLog {
    /// Create a log that mirrors entries to stdout.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            echo: true,
        }
    }

    /// Create a log that only records (no stdout mirror).
    pub fn quiet() -> Self {
        Self {
            entries: Vec::new(),
            echo: false,
        }
    }

    /// Start an empty log with the same stdout mirroring as this one.
    pub fn fresh(&self) -> Self {
        Self {
            entries: Vec::new(),
            echo: self.echo,
        }
    }

    /// Whether entries are mirrored to stdout.
    pub fn echoes(&self) -> bool {
        self.echo
    }

    /// Append an entry stamped with the current time.
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) -> &LogEntry {
        self.push_at(level, message, Utc::now())
    }

    /// Append an entry stamped at `now`, clamped to stay after the previous entry.
    pub fn push_at(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> &LogEntry {
        let timestamp = match self.entries.last() {
            Some(prev) if now <= prev.timestamp => {
                prev.timestamp + ChronoDuration::microseconds(1)
            }
            _ => now,
        };
        let entry = LogEntry {
            timestamp,
            level,
            message: message.into(),
        };

        tracing::debug!(
            entry_level = %level,
            timestamp = %entry.timestamp,
            "{}",
            entry.message
        );
        if self.echo {
            println!("[{}] {}", level, entry.message);
        }

        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Success, message);
    }

    /// Entries in append order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the log, yielding its entries.
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
