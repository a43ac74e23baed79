//! User namespace isolation.
//!
//! Maps the invoking user to root inside the container, enabling rootless
//! containers. The maps are written by the parent once the child exists.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::IdMapping;

/// Writes the UID/GID maps for the user namespace of `pid`.
///
/// `setgroups` is denied first, which an unprivileged writer must do before
/// the kernel accepts a `gid_map`.
///
/// # Errors
///
/// Returns an error if writing to `/proc/<pid>/setgroups`,
/// `/proc/<pid>/uid_map` or `/proc/<pid>/gid_map` fails.
pub fn write_id_mappings(pid: u32, mapping: &IdMapping) -> Result<()> {
    write_id_mappings_in(&PathBuf::from(format!("/proc/{pid}")), mapping)?;
    tracing::debug!(
        pid,
        host_uid = mapping.host_uid,
        host_gid = mapping.host_gid,
        "wrote UID/GID map"
    );
    Ok(())
}

fn write_id_mappings_in(proc_dir: &Path, mapping: &IdMapping) -> Result<()> {
    let setgroups_path = proc_dir.join("setgroups");
    if setgroups_path.exists() {
        write_map(&setgroups_path, "deny")?;
    }
    write_map(&proc_dir.join("uid_map"), &mapping.uid_map_line())?;
    write_map(&proc_dir.join("gid_map"), &mapping.gid_map_line())
}

fn write_map(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| CorralError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
