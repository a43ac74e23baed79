//! Filesystem management for container isolation.
//!
//! Provides mount-propagation control, `chroot` into the pre-provisioned
//! root filesystem, and the container's own `/proc` mount.

pub mod chroot;
pub mod mount;
