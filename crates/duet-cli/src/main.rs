#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod command;
mod config;
mod server;
mod telemetry;

use std::process;

use crate::config::{Cli, Command};

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "duet_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "duet_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "duet_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "duet_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = format!("{error:#}"),
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    telemetry::init_tracing(cli.log_format)?;
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        "starting duet"
    );

    cli.validate()?;
    cli.log();

    match cli.command {
        Command::Run(args) => server::serve(args).await,
        Command::Plan(args) => command::plan(args).await,
        Command::Submit(args) => command::submit(args).await,
        Command::Status(args) => command::status(args).await,
    }
}
