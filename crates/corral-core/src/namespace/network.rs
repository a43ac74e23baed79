//! Network namespace inspection.

/// Returns the identity of the caller's network namespace (e.g. `net:[4026532281]`).
///
/// Only used for diagnostics; `None` when `/proc` is not mounted.
#[must_use]
pub fn current_network_namespace() -> Option<String> {
    std::fs::read_link("/proc/self/ns/net")
        .ok()
        .map(|link| link.display().to_string())
}
