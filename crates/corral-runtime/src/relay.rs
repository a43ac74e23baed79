//! Signal relay and cancellation.
//!
//! A supervising stage never dies from SIGINT/SIGTERM itself; a dedicated
//! thread receives them and acts on the child one layer down. The child's
//! PID is published to the thread through an atomic cell once it exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use corral_common::error::{CorralError, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};

/// Signals a supervisor relays instead of dying from.
pub const RELAYED_SIGNALS: [libc::c_int; 2] = [SIGINT, SIGTERM];

/// Single-slot publication of the child a relay acts on.
///
/// Empty until the child exists; signals arriving while it is empty are
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct ChildSlot(Arc<AtomicI32>);

impl ChildSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the child.
    pub fn publish(&self, pid: Pid) {
        self.0.store(pid.as_raw(), Ordering::SeqCst);
    }

    /// Empties the slot once the child has been waited for.
    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// The published child, if any.
    #[must_use]
    pub fn current(&self) -> Option<Pid> {
        match self.0.load(Ordering::SeqCst) {
            pid if pid > 0 => Some(Pid::from_raw(pid)),
            _ => None,
        }
    }
}

/// Cancellation context for the workload's command.
///
/// Cancelling kills the attached command outright; there is no graceful
/// in-band shutdown. A command attached after cancellation is killed on
/// attach.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    target: ChildSlot,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the token against `pid`.
    pub fn attach(&self, pid: Pid) {
        self.inner.target.publish(pid);
        if self.is_cancelled() {
            kill_target(pid);
        }
    }

    /// Disarms the token before the command is reaped.
    pub fn detach(&self) {
        self.inner.target.clear();
    }

    /// Cancels, killing the attached command if there is one.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(pid) = self.inner.target.current() {
            kill_target(pid);
        }
    }

    /// Whether [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

fn kill_target(pid: Pid) {
    // The command may already have exited.
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        tracing::debug!(%pid, error = %e, "kill after cancellation failed");
    }
}

/// A background thread reacting to every SIGINT/SIGTERM the process receives.
///
/// The thread runs until the process exits. Repeated signals are handled one
/// by one, never coalesced.
pub struct SignalRelay {
    handle: Handle,
}

impl SignalRelay {
    /// Forwards each received signal, unchanged, to the child in `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handlers cannot be installed or the thread
    /// cannot be spawned.
    pub fn forward_to(slot: ChildSlot) -> Result<Self> {
        Self::spawn(move |signal| {
            let Some(pid) = slot.current() else {
                tracing::debug!(%signal, "no child yet, signal dropped");
                return;
            };
            match kill(pid, signal) {
                Ok(()) => tracing::info!(%signal, %pid, "forwarded signal to child"),
                Err(e) => tracing::debug!(%signal, %pid, error = %e, "forwarding failed"),
            }
        })
    }

    /// Cancels `token` on the first signal (and again on every later one).
    ///
    /// # Errors
    ///
    /// Returns an error if the handlers cannot be installed or the thread
    /// cannot be spawned.
    pub fn cancel_on_signal(token: CancellationToken) -> Result<Self> {
        Self::spawn(move |signal| {
            tracing::info!(%signal, "shutdown requested, cancelling command");
            token.cancel();
        })
    }

    fn spawn<F>(mut on_signal: F) -> Result<Self>
    where
        F: FnMut(Signal) + Send + 'static,
    {
        let mut signals = Signals::new(RELAYED_SIGNALS).map_err(|e| CorralError::Process {
            message: format!("failed to install signal handlers: {e}"),
        })?;
        let handle = signals.handle();
        let _thread = std::thread::Builder::new()
            .name("signal-relay".into())
            .spawn(move || {
                for raw in signals.forever() {
                    if let Ok(signal) = Signal::try_from(raw) {
                        on_signal(signal);
                    }
                }
            })
            .map_err(|e| CorralError::Process {
                message: format!("failed to spawn signal relay: {e}"),
            })?;
        Ok(Self { handle })
    }

    /// Stops the relay thread; signal handlers stay installed.
    pub fn close(&self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_starts_empty() {
        let slot = ChildSlot::new();
        assert_eq!(slot.current(), None);
        slot.publish(Pid::from_raw(42));
        assert_eq!(slot.current(), Some(Pid::from_raw(42)));
        slot.clear();
        assert_eq!(slot.current(), None);
    }

    #[test]
    fn slot_clones_share_the_cell() {
        let slot = ChildSlot::new();
        let reader = slot.clone();
        slot.publish(Pid::from_raw(7));
        assert_eq!(reader.current(), Some(Pid::from_raw(7)));
    }

    #[test]
    fn token_without_target_only_records() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn attach_after_cancel_kills_immediately() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        token.attach(Pid::from_raw(i32::try_from(child.id()).unwrap()));
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }
}
