//! Unified error types for the Corral workspace.
//!
//! Setup failures map onto the variant naming the subsystem that failed so
//! the CLI can report them without inspecting raw errno values.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A namespace, mount, chroot or hostname syscall failed.
    #[error("isolation setup failed: {message}")]
    Isolation {
        /// Description of the failed isolation step.
        message: String,
    },

    /// A netlink request (veth, address, route) failed.
    #[error("network setup failed: {message}")]
    Network {
        /// Description of the failed network step.
        message: String,
    },

    /// Spawning, gating or waiting on a child process failed.
    #[error("process error: {message}")]
    Process {
        /// Description of the process failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
