//! Spawning the binary again inside new namespaces.
//!
//! The child is created with `clone(2)` so that it is itself the first
//! process of the new PID namespace, then held at a gate until the parent
//! has finished the steps that need its PID: writing user-namespace ID maps
//! and moving the veth peer into its network namespace.

use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};

use corral_common::constants::{BIN_NAME, SELF_EXE};
use corral_common::error::{CorralError, Result};
use corral_core::isolation_error;
use corral_core::namespace::pid::{ChildExit, await_exit, wait_for};
use nix::fcntl::OFlag;
use nix::sched::{CloneFlags, clone};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const STACK_SIZE: usize = 1024 * 1024;

/// Exit status of a gated child whose parent gave up before opening the gate.
const GATE_ABANDONED: isize = 1;

/// A namespaced child blocked before `execv` of the next stage.
#[derive(Debug)]
pub struct GatedChild {
    pid: Pid,
    gate: File,
}

impl GatedChild {
    /// Host PID of the child.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Lets the child exec the next stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the gate cannot be written; the child is then
    /// killed and reaped.
    pub fn open(mut self) -> Result<NamespacedChild> {
        let pid = self.pid;
        if let Err(e) = self.gate.write_all(&[1]) {
            self.abort();
            return Err(CorralError::Process {
                message: format!("failed to release child {pid}: {e}"),
            });
        }
        Ok(NamespacedChild { pid })
    }

    /// Kills and reaps the child without letting it run.
    pub fn abort(self) {
        let pid = self.pid;
        drop(self.gate);
        if let Err(e) = kill(pid, Signal::SIGKILL) {
            tracing::debug!(%pid, error = %e, "kill of gated child failed");
        }
        if let Err(e) = wait_for(pid) {
            tracing::warn!(%pid, error = %e, "failed to reap aborted child");
        }
    }
}

/// A namespaced child running the next stage.
#[derive(Debug)]
pub struct NamespacedChild {
    pid: Pid,
}

impl NamespacedChild {
    /// Host PID of the child.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Blocks until the child has exited, without collecting it.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitid(2)` fails.
    pub fn await_exit(&self) -> Result<()> {
        await_exit(self.pid)
    }

    /// Collects the child, blocking until it exits.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(self) -> Result<ChildExit> {
        wait_for(self.pid)
    }
}

/// Clones a child into the namespaces in `flags` that will exec
/// `SELF_EXE` with `args` once its gate is opened.
///
/// Standard I/O is inherited, so the chain stays attached to the caller's
/// terminal.
///
/// # Errors
///
/// Returns an error if an argument contains a NUL byte, or if the pipe or
/// `clone(2)` fails.
pub fn spawn_gated(flags: CloneFlags, args: &[String]) -> Result<GatedChild> {
    let exe = to_cstring(SELF_EXE)?;
    let argv = std::iter::once(BIN_NAME)
        .chain(args.iter().map(String::as_str))
        .map(to_cstring)
        .collect::<Result<Vec<_>>>()?;
    // Built before cloning: the child must not allocate.
    let argv_ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    let (gate_rx, gate_tx) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::Process {
        message: format!("failed to create start gate: {e}"),
    })?;
    let rx = gate_rx.as_raw_fd();
    let tx = gate_tx.as_raw_fd();

    let mut stack = vec![0u8; STACK_SIZE];
    let child_main = Box::new(|| gated_exec(rx, tx, &exe, &argv_ptrs));
    // SAFETY: the child runs on its own stack in a copy of this address space
    // and only performs async-signal-safe calls (close, read, execv, exit)
    // on data prepared before the clone.
    let pid = unsafe { clone(child_main, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| isolation_error(&format!("clone({flags:?})"), e))?;
    drop(gate_rx);

    tracing::debug!(%pid, ?flags, "namespaced child cloned");
    Ok(GatedChild {
        pid,
        gate: File::from(gate_tx),
    })
}

fn gated_exec(rx: RawFd, tx: RawFd, exe: &CString, argv: &[*const libc::c_char]) -> isize {
    let mut byte = 0u8;
    // SAFETY: `rx` and `tx` are this process's copies of the gate pipe, and
    // `exe` / `argv` point at NUL-terminated data that outlives the call.
    unsafe {
        let _ = libc::close(tx);
        if libc::read(rx, (&raw mut byte).cast(), 1) != 1 {
            return GATE_ABANDONED;
        }
        let _ = libc::execv(exe.as_ptr(), argv.as_ptr());
    }
    127
}

fn to_cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| CorralError::Config {
        message: format!("argument contains a NUL byte: {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_bytes_are_rejected() {
        let err = spawn_gated(CloneFlags::empty(), &["bad\0arg".to_string()]).unwrap_err();
        assert!(matches!(err, CorralError::Config { .. }));
    }

    #[test]
    fn new_pid_namespace_needs_privilege() {
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let err = spawn_gated(CloneFlags::CLONE_NEWPID, &["--version".to_string()]).unwrap_err();
        assert!(matches!(err, CorralError::PermissionDenied { .. }));
    }

    #[test]
    fn aborted_child_never_runs() {
        let child = spawn_gated(CloneFlags::empty(), &["--version".to_string()]).unwrap();
        assert!(child.pid().as_raw() > 0);
        child.abort();
    }
}
