//! Init stage: PID 1 of the container's PID namespace.
//!
//! Init starts the workload stage, forwards SIGINT/SIGTERM to it and reaps
//! every process in the namespace until the workload exits.

use std::os::unix::process::CommandExt;
use std::process::Command;

use corral_common::config::RuntimeConfig;
use corral_common::constants::{BIN_NAME, SELF_EXE};
use corral_common::error::{CorralError, Result};
use corral_common::types::Stage;
use corral_core::namespace::pid::{is_namespace_init, reap_until, wait_for};
use nix::unistd::Pid;

use crate::relay::{ChildSlot, SignalRelay};
use crate::stage::Invocation;

/// Runs the init stage and returns the workload's exit status.
///
/// Invoked outside a fresh PID namespace it does nothing and reports
/// success.
///
/// # Errors
///
/// Returns an error if the relay cannot be installed, the workload stage
/// cannot be spawned, or waiting for it fails.
pub fn run(config: &RuntimeConfig, argv: &[String]) -> Result<u8> {
    if !is_namespace_init() {
        tracing::warn!("init stage is not PID 1 of a new PID namespace, nothing to do");
        return Ok(0);
    }
    tracing::info!(command = ?argv, "init stage starting");

    let slot = ChildSlot::new();
    let _relay = SignalRelay::forward_to(slot.clone())?;

    let invocation = Invocation::after(Stage::Init, config, argv).ok_or_else(|| {
        CorralError::Process {
            message: "init has no stage to start".into(),
        }
    })?;
    let child = Command::new(SELF_EXE)
        .arg0(BIN_NAME)
        .args(invocation.args()?)
        .spawn()
        .map_err(|e| CorralError::Process {
            message: format!("failed to start {} stage: {e}", invocation.stage),
        })?;
    let pid = Pid::from_raw(i32::try_from(child.id()).map_err(|_| CorralError::Process {
        message: format!("pid {} out of range", child.id()),
    })?);
    slot.publish(pid);
    tracing::debug!(%pid, stage = %invocation.stage, "stage started");

    // Disarm the relay while the PID still belongs to the exited stage.
    let exited = reap_until(pid);
    slot.clear();
    exited?;
    let exit = wait_for(pid)?;

    tracing::info!(?exit, "init stage finished");
    Ok(exit.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_common::types::ContainerId;

    #[test]
    fn outside_pid_namespace_is_a_no_op() {
        let config = RuntimeConfig::for_instance(ContainerId::new("noop"), "/nonexistent");
        let argv = vec!["/bin/true".to_string()];
        assert_eq!(run(&config, &argv).unwrap(), 0);
    }
}
