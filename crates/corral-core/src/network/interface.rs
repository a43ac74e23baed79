//! Container side of the link, configured from inside the network namespace.

use corral_common::config::NetworkConfig;
use corral_common::error::Result;

use super::Netlink;

/// Brings up loopback and turns the relocated veth end into the primary
/// interface: renamed, addressed, up, with a default route via the host end.
///
/// # Errors
///
/// Returns an error if any netlink request fails, including when the veth
/// end has not been moved into this namespace.
pub fn configure_container_link(config: &NetworkConfig) -> Result<()> {
    let netlink = Netlink::connect()?;

    let lo = netlink.link_index("lo")?;
    netlink.set_up(lo)?;

    let index = netlink.link_index(&config.container_interface)?;
    netlink.rename(index, &config.primary_interface)?;
    netlink.add_address(index, config.container_address, config.prefix_len)?;
    netlink.set_up(index)?;
    netlink.add_default_route(config.host_address)?;

    tracing::info!(
        interface = %config.primary_interface,
        address = %config.container_address,
        prefix_len = config.prefix_len,
        gateway = %config.host_address,
        "container network configured"
    );
    Ok(())
}
