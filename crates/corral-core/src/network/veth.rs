//! Host side of the container link.

use corral_common::config::NetworkConfig;
use corral_common::error::Result;

use super::{LinkRemoval, Netlink};

/// A veth pair created in the host namespace.
///
/// Dropping the pair deletes the host end; the container end goes with it,
/// or with the container's namespace once it has been moved there.
pub struct VethPair {
    netlink: Netlink,
    host: String,
    peer: String,
    host_index: Option<u32>,
    deleted: bool,
}

impl VethPair {
    /// Creates the pair, addresses the host end and brings it up.
    ///
    /// The container end is left untouched: it is addressed from inside the
    /// container once it has been relocated.
    ///
    /// # Errors
    ///
    /// Returns an error if any netlink request fails; a pair created before
    /// the failure is deleted again.
    pub fn create(config: &NetworkConfig) -> Result<Self> {
        let netlink = Netlink::connect()?;
        netlink.add_veth(&config.host_interface, &config.container_interface)?;
        let mut pair = Self {
            netlink,
            host: config.host_interface.clone(),
            peer: config.container_interface.clone(),
            host_index: None,
            deleted: false,
        };
        let host_index = pair.netlink.link_index(&pair.host)?;
        pair.host_index = Some(host_index);
        pair.netlink
            .add_address(host_index, config.host_address, config.prefix_len)?;
        pair.netlink.set_up(host_index)?;
        tracing::info!(
            host = %pair.host,
            peer = %pair.peer,
            address = %config.host_address,
            prefix_len = config.prefix_len,
            "veth pair created"
        );
        Ok(pair)
    }

    /// Moves the container end into the network namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container end cannot be found or moved.
    pub fn move_peer_into(&self, pid: u32) -> Result<()> {
        let peer_index = self.netlink.link_index(&self.peer)?;
        self.netlink.move_to_namespace_of(peer_index, pid)?;
        tracing::info!(peer = %self.peer, pid, "veth peer moved into container namespace");
        Ok(())
    }

    /// Deletes the host end, logging instead of failing.
    pub fn release(mut self) {
        self.delete();
    }

    fn delete(&mut self) {
        if self.deleted {
            return;
        }
        self.deleted = true;
        let index = match self.host_index {
            Some(index) => index,
            None => match self.netlink.link_index(&self.host) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(host = %self.host, error = %e, "failed to delete veth");
                    return;
                }
            },
        };
        match self.netlink.delete_link(index) {
            Ok(LinkRemoval::Deleted) => tracing::info!(host = %self.host, "veth pair deleted"),
            Ok(LinkRemoval::AlreadyGone) => {
                tracing::debug!(host = %self.host, "veth pair already removed with its namespace");
            }
            Err(e) => tracing::warn!(host = %self.host, error = %e, "failed to delete veth"),
        }
    }
}

impl Drop for VethPair {
    fn drop(&mut self) {
        self.delete();
    }
}
