//! PID namespace helpers.
//!
//! Inside a new PID namespace the first process is PID 1: orphans are
//! re-parented to it and it must reap them.

use corral_common::error::{CorralError, Result};
use corral_common::types::signal_exit_code;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid, waitpid};
use nix::unistd::Pid;

/// How a waited-for child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with the given code.
    Exited(i32),
    /// Killed by the given signal.
    Signaled(Signal),
}

impl ChildExit {
    /// Exit status to report for this termination.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Exited(code) => u8::try_from(code).unwrap_or(1),
            Self::Signaled(sig) => signal_exit_code(sig as i32),
        }
    }

    const fn from_status(status: WaitStatus) -> Option<(Pid, Self)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, Self::Exited(code))),
            WaitStatus::Signaled(pid, sig, _) => Some((pid, Self::Signaled(sig))),
            _ => None,
        }
    }
}

/// Whether the caller is PID 1 of its PID namespace.
#[must_use]
pub fn is_namespace_init() -> bool {
    nix::unistd::getpid().as_raw() == 1
}

/// Blocks until `pid` terminates.
///
/// # Errors
///
/// Returns an error if `waitpid(2)` fails for a reason other than `EINTR`.
pub fn wait_for(pid: Pid) -> Result<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some((_, exit)) = ChildExit::from_status(status) {
                    return Ok(exit);
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(CorralError::Process {
                    message: format!("waitpid({pid}) failed: {e}"),
                });
            }
        }
    }
}

/// Blocks until `target` has exited, leaving it unreaped.
///
/// The PID stays allocated until [`wait_for`] collects it, so anything still
/// holding it can be disarmed first without racing PID reuse.
///
/// # Errors
///
/// Returns an error if `waitid(2)` fails for a reason other than `EINTR`.
pub fn await_exit(target: Pid) -> Result<()> {
    loop {
        match waitid(Id::Pid(target), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(CorralError::Process {
                    message: format!("waitid({target}) failed: {e}"),
                });
            }
        }
    }
}

/// Reaps every other child until `target` has exited, leaving `target`
/// itself unreaped.
///
/// Orphans re-parented to PID 1 are collected along the way so they never
/// linger as zombies while the workload runs. Collect `target` with
/// [`wait_for`] afterwards.
///
/// # Errors
///
/// Returns an error if waiting fails, including `ECHILD` before `target`
/// was seen.
pub fn reap_until(target: Pid) -> Result<()> {
    loop {
        match waitid(Id::All, WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(status) => match status.pid() {
                Some(pid) if pid == target => return Ok(()),
                Some(pid) => {
                    let exit = wait_for(pid)?;
                    tracing::debug!(%pid, ?exit, "reaped orphan");
                }
                None => {}
            },
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(CorralError::Process {
                    message: format!("waiting while reaping for {target} failed: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_is_not_namespace_init() {
        assert!(!is_namespace_init());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ChildExit::Exited(0).exit_code(), 0);
        assert_eq!(ChildExit::Exited(42).exit_code(), 42);
        assert_eq!(ChildExit::Signaled(Signal::SIGKILL).exit_code(), 137);
        assert_eq!(ChildExit::Signaled(Signal::SIGINT).exit_code(), 130);
    }

    #[test]
    fn wait_for_collects_exit_code() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 7"])
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        assert_eq!(wait_for(pid).unwrap(), ChildExit::Exited(7));
    }

    #[test]
    fn await_exit_leaves_child_to_be_collected() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 4"])
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        await_exit(pid).unwrap();
        // Still a zombie: the PID is not free for reuse yet.
        assert!(std::path::Path::new(&format!("/proc/{pid}")).exists());
        assert_eq!(wait_for(pid).unwrap(), ChildExit::Exited(4));
    }
}
