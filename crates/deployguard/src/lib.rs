//! deployguard - deployment verification gate
//!
//! Provides a verification pipeline that:
//! - Runs the project build as a bounded subprocess
//! - Boots the application server and waits for it to answer
//! - Probes the status and control endpoints against their contracts
//! - Collapses every outcome into a timestamped, JSON-serializable report

pub mod config;
pub mod error;
pub mod log;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod runner;
pub mod supervisor;
pub mod telemetry;

// Re-export key types
pub use config::{ReadinessPolicy, VerifyConfig};
pub use error::{ProbeError, VerifyError};
pub use log::{LogEntry, LogLevel, RunLog};
pub use pipeline::{PipelineState, Prober, VerificationPipeline};
pub use probe::{ControlOutcome, EndpointProber, ReadyInfo};
pub use report::{FailureReason, Report, ReportEmitter, ValidationOutcome, Verdict};
pub use runner::{CommandResult, CommandRunner};
pub use supervisor::{ProcessHandle, ProcessSupervisor, StopOutcome};
