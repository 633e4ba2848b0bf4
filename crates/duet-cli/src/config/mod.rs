//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── log_format: LogFormat          # text or json
//! └── command
//!     ├── run     RunArgs             # NATS, transport, executor, manifest
//!     ├── plan    PlanArgs            # planner, request file
//!     ├── submit  SubmitArgs          # NATS, transport, planner, request file
//!     └── status  StatusArgs          # NATS, transport, job id
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.

mod executor;

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use duet_nats::NatsConfig;
use duet_nats::job::JobId;
use duet_nats::transport::TransportConfig;
use duet_runtime::planner::PlannerConfig;
pub use executor::ExecutorArgs;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "duet")]
#[command(about = "Duet workflow control plane")]
#[command(version)]
pub struct Cli {
    /// Log output format
    #[arg(
        long = "log-format",
        env = "DUET_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text,
        global = true
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the control-plane executor until interrupted.
    Run(RunArgs),
    /// Print the graph planned for a request.
    Plan(PlanArgs),
    /// Plan a request and enqueue it as a job.
    Submit(SubmitArgs),
    /// Print a job's status and progress.
    Status(StatusArgs),
}

/// Connection settings shared by the commands that talk to the broker.
#[derive(Debug, Clone, Args)]
pub struct TransportArgs {
    #[clap(flatten)]
    pub nats: NatsConfig,

    #[clap(flatten)]
    pub transport: TransportConfig,
}

impl TransportArgs {
    fn validate(&self) -> anyhow::Result<()> {
        self.nats
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid NATS configuration")?;
        self.transport
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid transport configuration")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[clap(flatten)]
    pub connection: TransportArgs,

    #[clap(flatten)]
    pub executor: ExecutorArgs,

    /// Capability manifest to build the task registry from
    #[arg(long = "manifest", env = "DUET_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Seconds to wait for the pass in progress when shutting down
    #[arg(long = "shutdown-timeout-secs", env = "DUET_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    #[clap(flatten)]
    pub planner: PlannerConfig,

    /// Request file (JSON)
    #[arg(long = "request", short = 'r')]
    pub request: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    #[clap(flatten)]
    pub connection: TransportArgs,

    #[clap(flatten)]
    pub planner: PlannerConfig,

    /// Request file (JSON)
    #[arg(long = "request", short = 'r')]
    pub request: PathBuf,

    /// Wait up to this many seconds for the job result
    #[arg(long = "wait")]
    pub wait: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[clap(flatten)]
    pub connection: TransportArgs,

    /// Job to inspect
    pub job_id: JobId,

    /// Keep printing updates until the job finishes
    #[arg(long = "follow", short = 'f')]
    pub follow: bool,

    /// Milliseconds between state reads while following
    #[arg(long = "follow-interval-ms", default_value_t = 1000)]
    pub follow_interval_ms: u64,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Validates the configuration of the selected command.
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.command {
            Command::Run(args) => {
                args.connection.validate()?;
                args.executor.validate()?;
            }
            Command::Plan(args) => validate_planner(&args.planner)?,
            Command::Submit(args) => {
                args.connection.validate()?;
                validate_planner(&args.planner)?;
            }
            Command::Status(args) => args.connection.validate()?,
        }
        Ok(())
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        let connection = match &self.command {
            Command::Run(args) => Some(&args.connection),
            Command::Submit(args) => Some(&args.connection),
            Command::Status(args) => Some(&args.connection),
            Command::Plan(_) => None,
        };
        if let Some(connection) = connection {
            tracing::info!(
                target: TRACING_TARGET_CONFIG,
                nats_servers = ?connection.nats.servers(),
                control_group = %connection.transport.control_group,
                ack_wait_secs = connection.transport.ack_wait_secs,
                job_ttl_secs = connection.transport.job_ttl_secs,
                "Transport configuration"
            );
        }
    }

    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

fn validate_planner(config: &PlannerConfig) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid planner configuration")
}
