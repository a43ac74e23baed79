//! Root filesystem switching via `chroot(2)`.
//!
//! The working directory is reset to the new `/` straight away; a process
//! left with a cwd outside its root can still walk the host tree.

use std::path::Path;

use corral_common::error::Result;

use crate::isolation_error;

/// Changes the caller's root to `new_root` and its working directory to `/`.
///
/// # Errors
///
/// Returns an error if either `chroot(2)` or `chdir(2)` fails.
pub fn enter_root(new_root: &Path) -> Result<()> {
    nix::unistd::chroot(new_root)
        .map_err(|e| isolation_error(&format!("chroot({})", new_root.display()), e))?;
    nix::unistd::chdir("/").map_err(|e| isolation_error("chdir(/) after chroot", e))?;
    tracing::info!(new_root = %new_root.display(), "entered container root");
    Ok(())
}
