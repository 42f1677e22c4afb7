//! deployguard - deployment verification gate
//!
//! Builds the project, boots its dev server, probes `/api/status` and
//! `/api/control`, and writes `deployment_report.json` at the project root.
//! Exits 0 only when every check passed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use deployguard::config::split_command;
use deployguard::telemetry::{default_level, init_tracing, LogFormat};
use deployguard::{ReportEmitter, VerificationPipeline, VerifyConfig};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "deployguard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verify a project builds, boots and enforces its policy gate", long_about = None)]
struct Cli {
    /// Project path (default: current directory)
    #[arg(default_value = ".")]
    project_path: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines on stderr
    #[arg(long)]
    json: bool,

    /// Build command line
    #[arg(long, env = "DEPLOYGUARD_BUILD_CMD")]
    build_cmd: Option<String>,

    /// Server command line
    #[arg(long, env = "DEPLOYGUARD_SERVER_CMD")]
    server_cmd: Option<String>,

    /// Base URL of the application under test
    #[arg(long, env = "DEPLOYGUARD_BASE_URL")]
    base_url: Option<String>,

    /// Build timeout in seconds
    #[arg(long, env = "DEPLOYGUARD_BUILD_TIMEOUT_SECS")]
    build_timeout_secs: Option<u64>,

    /// How long to wait for the server to answer, in seconds
    #[arg(long, env = "DEPLOYGUARD_READY_TIMEOUT_SECS")]
    ready_timeout_secs: Option<u64>,
}

impl Cli {
    fn config(&self) -> Result<VerifyConfig> {
        let mut config = VerifyConfig::default();

        if let Some(line) = &self.build_cmd {
            let command = split_command(line);
            if command.is_empty() {
                bail!("--build-cmd must not be empty");
            }
            config = config.with_build_command(command);
        }
        if let Some(line) = &self.server_cmd {
            let command = split_command(line);
            if command.is_empty() {
                bail!("--server-cmd must not be empty");
            }
            config = config.with_server_command(command);
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.as_str());
        }
        if let Some(secs) = self.build_timeout_secs {
            config = config.with_build_timeout_secs(secs);
        }
        if let Some(secs) = self.ready_timeout_secs {
            let mut readiness = config.readiness.clone();
            readiness.timeout_ms = secs.saturating_mul(1000);
            config = config.with_readiness(readiness);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(
        LogFormat::from_json_flag(cli.json),
        default_level(cli.verbose),
    );

    let code = cmd_verify(&cli).await?;
    std::process::exit(code);
}

/// Run the pipeline, persist the report, and return the exit code.
async fn cmd_verify(cli: &Cli) -> Result<i32> {
    let config = cli.config()?;
    debug!(?config, "Resolved configuration");

    let mut pipeline = VerificationPipeline::new(&cli.project_path, config)
        .context("Failed to initialise verification pipeline")?;
    let report = pipeline.run().await;

    let path = ReportEmitter::emit(&cli.project_path, &report)
        .context("Failed to persist deployment report")?;

    println!();
    println!("Report: {}", path.display());
    Ok(report.exit_code())
}
