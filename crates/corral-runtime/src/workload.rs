//! Workload stage: finish isolation, run the user's command, unwind.
//!
//! Setup runs strictly in order (cgroup, hostname, chroot, `/proc`,
//! network) and every acquired resource is held by a guard, so teardown
//! happens in reverse on every exit path, including failed setup.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus};

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::ShutdownCause;
use corral_core::cgroup::{Cgroup, CgroupGuard};
use corral_core::filesystem::chroot::enter_root;
use corral_core::filesystem::mount::{ProcMount, make_mounts_private};
use corral_core::namespace::network::current_network_namespace;
use corral_core::namespace::pid::await_exit;
use corral_core::namespace::uts::set_hostname;
use corral_core::network::interface::configure_container_link;
use nix::unistd::Pid;

use crate::relay::{CancellationToken, SignalRelay};

/// Progress of the workload stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    /// Nothing acquired yet.
    Initializing,
    /// Cgroup joined, hostname set, root switched and `/proc` mounted.
    IsolatedFs,
    /// Network configured (or not requested).
    IsolatedNet,
    /// The command is running.
    Running,
    /// The command finished on its own or failed.
    Exited,
    /// The command was killed by cancellation.
    Signaled,
    /// Releasing resources.
    Cleanup,
    /// All resources released.
    Done,
}

impl WorkloadState {
    /// Whether `next` directly follows `self`.
    ///
    /// `Cleanup` is reachable from every state before it, so a failed setup
    /// step still unwinds what was acquired.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::IsolatedFs)
                | (Self::IsolatedFs, Self::IsolatedNet)
                | (Self::IsolatedNet, Self::Running)
                | (Self::Running, Self::Exited | Self::Signaled)
                | (Self::Cleanup, Self::Done)
        ) || (matches!(next, Self::Cleanup) && !matches!(self, Self::Cleanup | Self::Done))
    }
}

#[derive(Debug)]
struct StateMachine {
    state: WorkloadState,
}

impl StateMachine {
    const fn new() -> Self {
        Self {
            state: WorkloadState::Initializing,
        }
    }

    fn advance(&mut self, next: WorkloadState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?next, "workload state");
        self.state = next;
    }
}

/// Resources owned by the stage, released in reverse order of acquisition.
///
/// Field order is drop order: `/proc` goes before the cgroup.
#[derive(Debug, Default)]
struct Acquired {
    proc_mount: Option<ProcMount>,
    cgroup: Option<CgroupGuard>,
}

impl Acquired {
    fn release(&mut self) {
        if let Some(proc_mount) = self.proc_mount.take() {
            proc_mount.release();
        }
        if let Some(cgroup) = self.cgroup.take() {
            cgroup.release();
        }
    }
}

/// Runs the workload stage and returns the exit status to report.
///
/// # Errors
///
/// Returns an error if any setup step fails; resources acquired before the
/// failure have been released by the time it is returned. Failures of the
/// command itself are not errors; they are reported through the status.
pub fn run(config: &RuntimeConfig, argv: &[String]) -> Result<u8> {
    tracing::info!(command = ?argv, pid = std::process::id(), "workload stage starting");

    let token = CancellationToken::new();
    let _relay = SignalRelay::cancel_on_signal(token.clone())?;

    let mut machine = StateMachine::new();
    let mut acquired = Acquired::default();
    let outcome = isolate_and_run(config, argv, &token, &mut machine, &mut acquired);

    machine.advance(WorkloadState::Cleanup);
    acquired.release();
    machine.advance(WorkloadState::Done);

    let cause = outcome?;
    tracing::info!("workload stage finished");
    Ok(cause.exit_code())
}

fn isolate_and_run(
    config: &RuntimeConfig,
    argv: &[String],
    token: &CancellationToken,
    machine: &mut StateMachine,
    acquired: &mut Acquired,
) -> Result<ShutdownCause> {
    let namespaces = &config.isolation.namespaces;

    if config.cgroup.enabled {
        acquired.cgroup = Some(Cgroup::detect(&config.cgroup).limit_and_join()?);
    }
    if namespaces.uts {
        set_hostname(&config.hostname)?;
    }
    if namespaces.mount {
        make_mounts_private()?;
    }
    enter_root(&config.rootfs)?;
    acquired.proc_mount = Some(ProcMount::mount(Path::new("/proc"))?);
    machine.advance(WorkloadState::IsolatedFs);

    if config.network_enabled() {
        tracing::debug!(netns = ?current_network_namespace(), "configuring network");
        configure_container_link(&config.network)?;
    }
    machine.advance(WorkloadState::IsolatedNet);

    machine.advance(WorkloadState::Running);
    let cause = run_command(argv, token)?;
    machine.advance(if matches!(cause, ShutdownCause::Cancelled) {
        WorkloadState::Signaled
    } else {
        WorkloadState::Exited
    });

    match &cause {
        ShutdownCause::Exited { code: 0 } => tracing::info!(%cause, "command finished"),
        ShutdownCause::Cancelled => tracing::info!(%cause, "command shut down by signal"),
        _ => tracing::warn!(%cause, "command finished"),
    }
    Ok(cause)
}

fn run_command(argv: &[String], token: &CancellationToken) -> Result<ShutdownCause> {
    let (program, args) = argv.split_first().ok_or_else(|| CorralError::Config {
        message: "no command to run".into(),
    })?;

    let mut child = match Command::new(program).args(args).spawn() {
        Ok(child) => child,
        Err(e) => return Ok(classify(Err(e), token.is_cancelled())),
    };
    let pid = Pid::from_raw(i32::try_from(child.id()).map_err(|_| CorralError::Process {
        message: format!("pid {} out of range", child.id()),
    })?);
    tracing::info!(%pid, command = %program, "command started");
    token.attach(pid);

    // Wait without reaping so the token never targets a recycled PID.
    let exited = await_exit(pid);
    token.detach();
    if let Err(e) = exited {
        tracing::warn!(%pid, error = %e, "waiting for command without reaping failed");
    }

    Ok(classify(child.wait(), token.is_cancelled()))
}

/// Classifies how the command ended.
///
/// Cancellation takes precedence: once the supervisor asked for shutdown,
/// whatever the command reported is a consequence of being killed.
#[must_use]
pub fn classify(status: io::Result<ExitStatus>, cancelled: bool) -> ShutdownCause {
    if cancelled {
        return ShutdownCause::Cancelled;
    }
    match status {
        Ok(status) => match (status.code(), status.signal()) {
            (Some(code), _) => ShutdownCause::Exited { code },
            (None, Some(signal)) => ShutdownCause::Failed {
                reason: format!("terminated by signal {signal}"),
                signal: Some(signal),
            },
            (None, None) => ShutdownCause::Failed {
                reason: format!("unrecognised wait status {status}"),
                signal: None,
            },
        },
        Err(e) => ShutdownCause::Failed {
            reason: e.to_string(),
            signal: None,
        },
    }
}
