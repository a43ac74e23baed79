//! Hidden `init` and `workload` subcommands, invoked only by re-execution.

use anyhow::Context;
use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::{init, workload};

/// Arguments every internal stage receives from the stage above it.
#[derive(Args, Debug)]
pub struct StageArgs {
    /// Resolved container configuration as JSON.
    #[arg(long)]
    pub config: String,

    /// Command to run at the end of the chain.
    #[arg(last = true, required = true)]
    pub argv: Vec<String>,
}

impl StageArgs {
    fn runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        RuntimeConfig::from_json(&self.config).context("malformed stage configuration")
    }
}

/// Executes the init stage.
///
/// # Errors
///
/// Returns an error if the configuration is malformed or the workload stage
/// cannot be started or waited for.
pub fn execute_init(args: &StageArgs) -> anyhow::Result<u8> {
    let config = args.runtime_config()?;
    Ok(init::run(&config, &args.argv)?)
}

/// Executes the workload stage.
///
/// # Errors
///
/// Returns an error if the configuration is malformed or a setup step fails.
pub fn execute_workload(args: &StageArgs) -> anyhow::Result<u8> {
    let config = args.runtime_config()?;
    Ok(workload::run(&config, &args.argv)?)
}
