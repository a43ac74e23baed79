//! Launcher stage: the host-side entry point of a container.
//!
//! The launcher creates the veth pair, clones the namespaced child, finishes
//! the host-side steps that need the child's PID and then waits, relaying
//! SIGINT/SIGTERM, until the chain below it exits.

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::Stage;
use corral_core::namespace::clone_flags;
use corral_core::namespace::user::write_id_mappings;
use corral_core::network::veth::VethPair;

use crate::process::{GatedChild, spawn_gated};
use crate::relay::{ChildSlot, SignalRelay};
use crate::stage::Invocation;

/// Exit status reported when the chain was started but could not be
/// waited for.
const EXIT_WAIT_FAILED: u8 = 1;

/// Starts a container running `argv` and returns the status to exit with.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or any step before the
/// child is released fails. Host resources created before the failure are
/// removed before the error is returned.
pub fn run(config: &RuntimeConfig, argv: &[String]) -> Result<u8> {
    if argv.is_empty() {
        return Err(CorralError::Config {
            message: "no command given".into(),
        });
    }
    config.validate()?;

    let invocation = Invocation::after(Stage::Launcher, config, argv).ok_or_else(|| {
        CorralError::Process {
            message: "launcher has no stage to start".into(),
        }
    })?;
    let args = invocation.args()?;
    let namespaces = &config.isolation.namespaces;
    tracing::info!(
        id = %config.id,
        rootfs = %config.rootfs.display(),
        ?namespaces,
        command = ?argv,
        "starting container"
    );

    let slot = ChildSlot::new();
    let _relay = SignalRelay::forward_to(slot.clone())?;

    let veth = if config.network_enabled() {
        Some(VethPair::create(&config.network)?)
    } else {
        None
    };

    let gated = spawn_gated(clone_flags(namespaces), &args)?;
    let pid = gated.pid();
    tracing::info!(%pid, stage = %invocation.stage, "namespaced child created");

    if let Err(e) = prepare_child(config, &gated, veth.as_ref()) {
        gated.abort();
        return Err(e);
    }
    let child = gated.open()?;
    slot.publish(pid);

    // Disarm the relay while the PID still belongs to the exited child.
    let exited = child.await_exit();
    slot.clear();
    let status = match exited.and_then(|()| child.wait()) {
        Ok(exit) => {
            tracing::info!(?exit, "container exited");
            exit.exit_code()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to wait for container");
            EXIT_WAIT_FAILED
        }
    };

    if let Some(veth) = veth {
        veth.release();
    }
    Ok(status)
}

/// Host-side steps that must complete before the child execs.
fn prepare_child(config: &RuntimeConfig, child: &GatedChild, veth: Option<&VethPair>) -> Result<()> {
    let pid = u32::try_from(child.pid().as_raw()).map_err(|_| CorralError::Process {
        message: format!("invalid child pid {}", child.pid()),
    })?;
    let isolation = &config.isolation;
    if let (true, Some(mapping)) = (isolation.namespaces.user, &isolation.id_mapping) {
        write_id_mappings(pid, mapping)?;
    }
    if let Some(veth) = veth {
        veth.move_peer_into(pid)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_common::types::ContainerId;

    #[test]
    fn empty_command_is_rejected_before_any_setup() {
        let config = RuntimeConfig::for_instance(ContainerId::new("empty"), "/srv/rootfs");
        let err = run(&config, &[]).unwrap_err();
        assert!(matches!(err, CorralError::Config { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_setup() {
        let mut config = RuntimeConfig::for_instance(ContainerId::new("bad"), "/srv/rootfs");
        config.hostname.clear();
        let err = run(&config, &["/bin/true".to_string()]).unwrap_err();
        assert!(matches!(err, CorralError::Config { .. }));
    }
}
