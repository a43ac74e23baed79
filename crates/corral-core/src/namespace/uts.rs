//! UTS namespace isolation.
//!
//! Allows the container to have its own hostname.

use corral_common::error::Result;

use crate::isolation_error;

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname)
        .map_err(|e| isolation_error(&format!("sethostname({hostname})"), e))?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}
