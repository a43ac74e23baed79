//! Domain primitive types used across the Corral workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{EXIT_COMMAND_NOT_RUN, EXIT_SIGNAL_OFFSET};
use crate::error::CorralError;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns an 8-character tag suitable for embedding in interface names.
    ///
    /// The tag is the leading hex digits of a SHA-256 over the whole id, so
    /// ids sharing a prefix still get distinct device names.
    #[must_use]
    pub fn short(&self) -> String {
        Sha256::digest(self.0.as_bytes())
            .iter()
            .take(4)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a process in the re-exec pipeline.
///
/// Selected once at startup by the first CLI token and immutable for the
/// process's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Host-side entry point: owns the veth pair and the namespaced child.
    Launcher,
    /// PID 1 of the new PID namespace: forwards signals and reaps.
    Init,
    /// Completes isolation and runs the user's command.
    Workload,
}

impl Stage {
    /// The CLI token that selects this stage.
    #[must_use]
    pub const fn as_token(self) -> &'static str {
        match self {
            Self::Launcher => "run",
            Self::Init => "init",
            Self::Workload => "workload",
        }
    }

    /// The stage this one re-executes into, if any.
    ///
    /// A PID namespace always gets an Init hop so the workload never runs as
    /// PID 1 of a stage that still has supervisor duties.
    #[must_use]
    pub const fn next(self, namespaces: &NamespaceSet) -> Option<Self> {
        match self {
            Self::Launcher if namespaces.pid => Some(Self::Init),
            Self::Launcher | Self::Init => Some(Self::Workload),
            Self::Workload => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for Stage {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Self::Launcher),
            "init" => Ok(Self::Init),
            "workload" => Ok(Self::Workload),
            other => Err(CorralError::Config {
                message: format!("unknown pipeline stage: {other}"),
            }),
        }
    }
}

/// Kernel namespaces requested for the namespaced child.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSet {
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate user namespace.
    pub user: bool,
}

impl NamespaceSet {
    /// Namespaces of the privileged profile.
    #[must_use]
    pub const fn privileged() -> Self {
        Self {
            uts: true,
            pid: true,
            mount: true,
            network: true,
            user: false,
        }
    }

    /// Namespaces of the rootless profile.
    #[must_use]
    pub const fn rootless() -> Self {
        Self {
            uts: true,
            pid: true,
            mount: true,
            network: false,
            user: true,
        }
    }
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::privileged()
    }
}

/// Single-entry UID/GID mapping for a user namespace.
///
/// Maps exactly one host UID/GID pair to UID/GID 0 inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// Host UID that becomes root in the container.
    pub host_uid: u32,
    /// Host GID that becomes root's group in the container.
    pub host_gid: u32,
}

impl IdMapping {
    /// Renders the `uid_map` line for this mapping.
    #[must_use]
    pub fn uid_map_line(&self) -> String {
        format!("0 {} 1", self.host_uid)
    }

    /// Renders the `gid_map` line for this mapping.
    #[must_use]
    pub fn gid_map_line(&self) -> String {
        format!("0 {} 1", self.host_gid)
    }
}

/// Why the workload's command stopped running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownCause {
    /// The command ran to completion on its own.
    Exited {
        /// Exit code reported by the command.
        code: i32,
    },
    /// The command was killed because the supervisor was asked to shut down.
    Cancelled,
    /// The command could not be run, or died for a reason other than cancellation.
    Failed {
        /// Human-readable failure reason.
        reason: String,
        /// Signal that terminated the command, when there was one.
        signal: Option<i32>,
    },
}

impl ShutdownCause {
    /// Exit status the stage reports for this cause.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Exited { code } => u8::try_from(*code).unwrap_or(1),
            Self::Cancelled => signal_exit_code(9),
            Self::Failed {
                signal: Some(sig), ..
            } => signal_exit_code(*sig),
            Self::Failed { signal: None, .. } => EXIT_COMMAND_NOT_RUN,
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Cancelled => write!(f, "killed by supervisor-driven cancellation"),
            Self::Failed { reason, .. } => write!(f, "failed: {reason}"),
        }
    }
}

/// Exit status conventionally reported for a process killed by `signal`.
#[must_use]
pub fn signal_exit_code(signal: i32) -> u8 {
    u8::try_from(EXIT_SIGNAL_OFFSET + signal).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_hops_through_init_with_pid_namespace() {
        let ns = NamespaceSet::privileged();
        assert_eq!(Stage::Launcher.next(&ns), Some(Stage::Init));
        assert_eq!(Stage::Init.next(&ns), Some(Stage::Workload));
        assert_eq!(Stage::Workload.next(&ns), None);
    }

    #[test]
    fn launcher_skips_init_without_pid_namespace() {
        let ns = NamespaceSet {
            pid: false,
            ..NamespaceSet::privileged()
        };
        assert_eq!(Stage::Launcher.next(&ns), Some(Stage::Workload));
    }

    #[test]
    fn stage_tokens_parse_back() {
        for stage in [Stage::Launcher, Stage::Init, Stage::Workload] {
            assert_eq!(stage.as_token().parse::<Stage>().unwrap(), stage);
        }
        assert!("bootstrap".parse::<Stage>().is_err());
    }

    #[test]
    fn short_id_is_interface_safe() {
        let tag = ContainerId::new("my-box_42-extra").short();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ContainerId::generate().short().len(), 8);
    }

    #[test]
    fn short_id_is_stable_per_instance() {
        assert_eq!(ContainerId::new("web").short(), ContainerId::new("web").short());
    }

    #[test]
    fn ids_with_shared_prefix_get_distinct_tags() {
        let a = ContainerId::new("webserver-a");
        let b = ContainerId::new("webserver-b");
        assert_ne!(a.short(), b.short());
    }

    #[test]
    fn id_mapping_renders_single_entry() {
        let mapping = IdMapping {
            host_uid: 1000,
            host_gid: 100,
        };
        assert_eq!(mapping.uid_map_line(), "0 1000 1");
        assert_eq!(mapping.gid_map_line(), "0 100 1");
    }

    #[test]
    fn shutdown_cause_exit_codes() {
        assert_eq!(ShutdownCause::Exited { code: 0 }.exit_code(), 0);
        assert_eq!(ShutdownCause::Exited { code: 3 }.exit_code(), 3);
        assert_eq!(ShutdownCause::Cancelled.exit_code(), 137);
        let spawn_failure = ShutdownCause::Failed {
            reason: "not found".into(),
            signal: None,
        };
        assert_eq!(spawn_failure.exit_code(), 127);
        let segv = ShutdownCause::Failed {
            reason: "terminated by signal 11".into(),
            signal: Some(11),
        };
        assert_eq!(segv.exit_code(), 139);
    }
}
