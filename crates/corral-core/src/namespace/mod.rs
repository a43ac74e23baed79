//! Linux namespace management for container isolation.
//!
//! Translates a [`NamespaceSet`] into `clone(2)` flags and provides the
//! per-namespace helpers the pipeline stages call once inside.

pub mod network;
pub mod pid;
pub mod user;
pub mod uts;

use corral_common::types::NamespaceSet;
use nix::sched::CloneFlags;

/// Builds the `clone(2)` flags requesting every namespace in `set`.
#[must_use]
pub fn clone_flags(set: &NamespaceSet) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    if set.uts {
        flags |= CloneFlags::CLONE_NEWUTS;
    }
    if set.pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }
    if set.mount {
        flags |= CloneFlags::CLONE_NEWNS;
    }
    if set.network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if set.user {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    flags
}
