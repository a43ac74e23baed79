//! System-wide constants and default values.

/// Path used to re-execute the running binary for the next pipeline stage.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Mount point of the cgroup filesystem.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Controller subdirectory holding process-count groups on the legacy hierarchy.
pub const CGROUP_V1_PIDS_CONTROLLER: &str = "pids";

/// Default process-count ceiling for the workload's cgroup.
pub const DEFAULT_PIDS_MAX: u64 = 20;

/// Hostname set inside the UTS namespace.
pub const DEFAULT_HOSTNAME: &str = "container";

/// Canonical name of the container's primary interface.
pub const DEFAULT_PRIMARY_INTERFACE: &str = "eth0";

/// Host end of the point-to-point link.
pub const DEFAULT_HOST_ADDRESS: [u8; 4] = [192, 168, 100, 1];

/// Container end of the point-to-point link.
pub const DEFAULT_CONTAINER_ADDRESS: [u8; 4] = [192, 168, 100, 2];

/// Prefix length of the host/container subnet.
pub const DEFAULT_PREFIX_LEN: u8 = 24;

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
pub const MAX_INTERFACE_NAME: usize = 15;

/// Prefix of per-instance cgroup names.
pub const CGROUP_NAME_PREFIX: &str = "corral";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "corral";

/// Exit status reported when the command could not be started.
pub const EXIT_COMMAND_NOT_RUN: u8 = 127;

/// Offset added to a terminating signal number to form an exit status.
pub const EXIT_SIGNAL_OFFSET: i32 = 128;
