//! Cgroup resource management.
//!
//! Creates a process-count-limited group for the workload under whichever
//! hierarchy the host mounts at `/sys/fs/cgroup`: the legacy per-controller
//! layout (v1, `pids` controller) or the unified hierarchy (v2).
//!
//! Joining yields a [`CgroupGuard`]. The guard keeps directory handles opened
//! before `chroot`, so the group can still be left and removed after the
//! process has switched to the container's root.

pub mod v1;
pub mod v2;

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use corral_common::config::CgroupConfig;
use corral_common::constants::CGROUP_V1_PIDS_CONTROLLER;
use corral_common::error::{CorralError, Result};
use nix::errno::Errno;

/// Generation of the kernel cgroup API mounted on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// Legacy per-controller hierarchies.
    V1,
    /// Unified hierarchy.
    V2,
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// Detects the hierarchy version from the filesystem magic of `root`.
///
/// Anything that is not `cgroup2fs` (including a failed `statfs`) is treated
/// as the legacy layout.
#[must_use]
pub fn detect_version(root: &Path) -> CgroupVersion {
    match nix::sys::statfs::statfs(root) {
        Ok(stat) if stat.filesystem_type() == nix::sys::statfs::CGROUP2_SUPER_MAGIC => {
            CgroupVersion::V2
        }
        Ok(_) => CgroupVersion::V1,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "statfs failed, assuming cgroup v1");
            CgroupVersion::V1
        }
    }
}

/// A named, process-count-limited group that has not been joined yet.
#[derive(Debug, Clone)]
pub struct Cgroup {
    version: CgroupVersion,
    hierarchy: PathBuf,
    name: String,
    pids_max: u64,
}

impl Cgroup {
    /// Describes the group for `config` under the detected hierarchy.
    #[must_use]
    pub fn detect(config: &CgroupConfig) -> Self {
        Self::new(detect_version(&config.root), config)
    }

    /// Describes the group for `config` under an explicit hierarchy version.
    #[must_use]
    pub fn new(version: CgroupVersion, config: &CgroupConfig) -> Self {
        let hierarchy = match version {
            CgroupVersion::V1 => config.root.join(CGROUP_V1_PIDS_CONTROLLER),
            CgroupVersion::V2 => config.root.clone(),
        };
        Self {
            version,
            hierarchy,
            name: config.name.clone(),
            pids_max: config.pids_max,
        }
    }

    /// Directory of the group.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.hierarchy.join(&self.name)
    }

    /// Creates the group, applies the ceiling and moves the caller into it.
    ///
    /// # Errors
    ///
    /// See [`Cgroup::limit_and_join_pid`].
    pub fn limit_and_join(&self) -> Result<CgroupGuard> {
        self.limit_and_join_pid(std::process::id())
    }

    /// Creates the group, applies the ceiling and moves `pid` into it.
    ///
    /// An existing directory is reused. Failing to write the ceiling or the
    /// membership file is fatal: a group without its limit must never run
    /// a workload.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or if any control
    /// file cannot be written.
    pub fn limit_and_join_pid(&self, pid: u32) -> Result<CgroupGuard> {
        let path = self.path();
        self.create_dir()?;

        // Opened before the limit is applied so a failed write below still
        // leaves the guard able to remove the directory.
        let parent = File::open(&self.hierarchy).map_err(|e| CorralError::Io {
            path: self.hierarchy.clone(),
            source: e,
        })?;
        let evacuate_path = self.hierarchy.join("cgroup.procs");
        let evacuate = match File::options().write(true).open(&evacuate_path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::debug!(path = %evacuate_path.display(), error = %e, "hierarchy root not writable");
                None
            }
        };
        let mut guard = CgroupGuard {
            path,
            name: self.name.clone(),
            pid,
            parent,
            evacuate,
            released: false,
        };

        let applied = match self.version {
            CgroupVersion::V1 => v1::apply(&guard.path, self.pids_max, pid),
            CgroupVersion::V2 => v2::apply(&guard.path, self.pids_max, pid),
        };
        if let Err(e) = applied {
            guard.release_inner();
            return Err(e);
        }

        tracing::info!(
            path = %guard.path.display(),
            version = %self.version,
            pids_max = self.pids_max,
            pid,
            "joined cgroup"
        );
        Ok(guard)
    }

    fn create_dir(&self) -> Result<()> {
        let path = self.path();
        match std::fs::create_dir(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "cgroup created");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "cgroup already exists");
                Ok(())
            }
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }
}

/// Membership of a joined cgroup; removes the group when released or dropped.
///
/// Removal failures are logged, never returned: the kernel reclaims the
/// group once its last reference goes away.
#[derive(Debug)]
pub struct CgroupGuard {
    path: PathBuf,
    name: String,
    pid: u32,
    parent: File,
    evacuate: Option<File>,
    released: bool,
}

impl CgroupGuard {
    /// Directory of the joined group, as seen before `chroot`.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leaves the group and removes its directory.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // A group cannot be removed while it still has members, and the
        // caller is one of them.
        if let Some(procs) = self.evacuate.as_mut() {
            if let Err(e) = procs.write_all(self.pid.to_string().as_bytes()) {
                tracing::warn!(pid = self.pid, error = %e, "failed to move process out of cgroup");
            }
        }

        match remove_dir_at(&self.parent, &self.name) {
            Ok(()) => tracing::info!(path = %self.path.display(), "cgroup removed"),
            Err(Errno::ENOENT) => tracing::debug!(path = %self.path.display(), "cgroup already gone"),
            Err(e @ (Errno::ENOTEMPTY | Errno::EBUSY)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cgroup still in use, left for the kernel to reclaim");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clean up cgroup directory");
            }
        }
    }
}

impl Drop for CgroupGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[allow(unsafe_code)]
fn remove_dir_at(parent: &File, name: &str) -> nix::Result<()> {
    let c_name = CString::new(name).map_err(|_| Errno::EINVAL)?;
    // SAFETY: `parent` is an open directory descriptor for the duration of the
    // call and `c_name` is a valid NUL-terminated string.
    let rc = unsafe { libc::unlinkat(parent.as_raw_fd(), c_name.as_ptr(), libc::AT_REMOVEDIR) };
    Errno::result(rc).map(drop)
}

/// Writes a single control value, mapping failures to [`CorralError::Io`].
pub(crate) fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    std::fs::write(&path, value).map_err(|e| CorralError::Io { path, source: e })?;
    tracing::debug!(file, value, "cgroup control written");
    Ok(())
}
