//! CLI command definitions and dispatch.

pub mod run;
pub mod stage;

use clap::{Parser, Subcommand, ValueEnum};
use corral_common::constants::BIN_NAME;
use corral_common::types::Stage;

/// Corral: run a command in a minimal Linux container.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log line format. Stages inherit the environment variable, not the flag.
    #[arg(long, global = true, env = "CORRAL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Output format of log lines on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside a new container.
    Run(run::RunArgs),
    /// PID 1 of the container (internal).
    #[command(hide = true)]
    Init(stage::StageArgs),
    /// Isolation and command stage of the container (internal).
    #[command(hide = true)]
    Workload(stage::StageArgs),
}

/// Dispatches the parsed CLI command to its stage and returns the exit status.
///
/// # Errors
///
/// Returns an error if the stage fails before its command could be run.
pub fn execute(cli: Cli) -> anyhow::Result<u8> {
    let (stage, status) = match cli.command {
        Command::Run(args) => (Stage::Launcher, in_stage(Stage::Launcher, || run::execute(args))),
        Command::Init(args) => (Stage::Init, in_stage(Stage::Init, || stage::execute_init(&args))),
        Command::Workload(args) => (
            Stage::Workload,
            in_stage(Stage::Workload, || stage::execute_workload(&args)),
        ),
    };
    if let Err(e) = &status {
        tracing::error!(%stage, error = %e, "stage failed");
    }
    status
}

fn in_stage<F>(stage: Stage, f: F) -> anyhow::Result<u8>
where
    F: FnOnce() -> anyhow::Result<u8>,
{
    let span = tracing::info_span!("stage", %stage);
    span.in_scope(f)
}
