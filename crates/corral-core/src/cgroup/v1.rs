//! Legacy hierarchy: the group lives under the `pids` controller.

use std::path::Path;

use corral_common::error::Result;

use super::write_control;

/// Writes the ceiling, the auto-release flag and the membership of `pid`.
///
/// # Errors
///
/// Returns an error if any of the three control files cannot be written.
pub fn apply(dir: &Path, pids_max: u64, pid: u32) -> Result<()> {
    write_control(dir, "pids.max", &pids_max.to_string())?;
    write_control(dir, "notify_on_release", "1")?;
    write_control(dir, "cgroup.procs", &pid.to_string())
}
