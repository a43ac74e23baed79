//! Unified hierarchy: the group is a single directory under the mount point.

use std::path::Path;

use corral_common::error::Result;

use super::write_control;

/// Writes the ceiling and the membership of `pid`.
///
/// # Errors
///
/// Returns an error if either control file cannot be written.
pub fn apply(dir: &Path, pids_max: u64, pid: u32) -> Result<()> {
    write_control(dir, "pids.max", &pids_max.to_string())?;
    write_control(dir, "cgroup.procs", &pid.to_string())
}
