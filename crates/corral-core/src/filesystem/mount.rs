//! Mount utilities for container filesystem setup.

use std::path::{Path, PathBuf};

use corral_common::error::Result;
use nix::mount::{MntFlags, MsFlags, mount, umount2};

use crate::isolation_error;

/// Marks every mount in the caller's mount namespace as private.
///
/// Without this, mounts made inside the container propagate back to the
/// host's shared mounts.
///
/// # Errors
///
/// Returns an error if the remount fails.
pub fn make_mounts_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| isolation_error("making / private", e))?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}

/// A `proc` filesystem mounted for the container; lazily unmounted on release
/// or drop.
#[derive(Debug)]
pub struct ProcMount {
    target: PathBuf,
    mounted: bool,
}

impl ProcMount {
    /// Mounts a fresh `proc` at `target`.
    ///
    /// Must be called after `chroot`, otherwise it shadows the host's `/proc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `mount(2)` syscall fails.
    pub fn mount(target: &Path) -> Result<Self> {
        mount(
            Some("proc"),
            target,
            Some("proc"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            None::<&str>,
        )
        .map_err(|e| isolation_error(&format!("mounting proc at {}", target.display()), e))?;
        tracing::debug!(target = %target.display(), "proc mounted");
        Ok(Self {
            target: target.to_path_buf(),
            mounted: true,
        })
    }

    /// Unmounts the filesystem, logging instead of failing.
    pub fn release(mut self) {
        self.unmount();
    }

    fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        match umount2(&self.target, MntFlags::MNT_DETACH) {
            Ok(()) => tracing::debug!(target = %self.target.display(), "proc unmounted"),
            Err(e) => {
                tracing::warn!(target = %self.target.display(), error = %e, "proc unmount failed");
            }
        }
    }
}

impl Drop for ProcMount {
    fn drop(&mut self) {
        self.unmount();
    }
}
