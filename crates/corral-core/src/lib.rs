//! # corral-core
//!
//! Low-level Linux isolation primitives for the Corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags, user-namespace ID maps, hostname, PID-1 checks.
//! - **Cgroups**: version detection and process-count limiting on v1 and v2.
//! - **Filesystem**: mount propagation, `chroot`, and the `/proc` mount.
//! - **Network**: the host/container veth link, driven over netlink.
//!
//! Every host resource is acquired through a guard whose `Drop` releases it,
//! so teardown runs on every exit path in reverse order of acquisition.
//! All unsafe system calls are encapsulated with `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod network;

use corral_common::error::CorralError;
use nix::errno::Errno;

/// Maps a failed isolation syscall onto the workspace error.
///
/// `EPERM` and `EACCES` mean the caller lacks the privilege for the
/// requested isolation and surface as [`CorralError::PermissionDenied`].
#[must_use]
pub fn isolation_error(action: &str, errno: Errno) -> CorralError {
    let message = format!("{action} failed: {errno}");
    match errno {
        Errno::EPERM | Errno::EACCES => CorralError::PermissionDenied { message },
        _ => CorralError::Isolation { message },
    }
}
