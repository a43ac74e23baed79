//! Host/container virtual networking over netlink.
//!
//! A veth pair links the container to the host: the host end keeps its
//! address in the host namespace, the container end is moved into the
//! container's network namespace, renamed and addressed there.
//!
//! Requests go through `rtnetlink`, so no `ip` binary is needed on the host
//! or inside the container's root filesystem.

pub mod interface;
pub mod veth;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};

use corral_common::error::{CorralError, Result};
use futures::TryStreamExt;

/// Outcome of [`Netlink::delete_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRemoval {
    /// The link was deleted by this request.
    Deleted,
    /// The link did not exist any more.
    AlreadyGone,
}

/// A netlink session bound to the caller's current network namespace.
///
/// Each session owns a single-threaded runtime that drives the socket only
/// while a request is in flight.
pub struct Netlink {
    runtime: tokio::runtime::Runtime,
    handle: rtnetlink::Handle,
}

impl Netlink {
    /// Opens a route netlink socket in the current network namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the socket cannot be created.
    pub fn connect() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(|e| CorralError::Network {
                message: format!("failed to start netlink runtime: {e}"),
            })?;
        let handle = runtime
            .block_on(async {
                let (connection, handle, _) = rtnetlink::new_connection()?;
                drop(tokio::spawn(connection));
                Ok::<_, std::io::Error>(handle)
            })
            .map_err(|e| CorralError::Network {
                message: format!("failed to open netlink socket: {e}"),
            })?;
        Ok(Self { runtime, handle })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Looks up the index of the interface called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or no such interface exists.
    pub fn link_index(&self, name: &str) -> Result<u32> {
        let found = self.block_on(async {
            let mut links = self.handle.link().get().match_name(name.to_string()).execute();
            links.try_next().await
        });
        match found {
            Ok(Some(link)) => Ok(link.header.index),
            Ok(None) => Err(not_found(name)),
            Err(e) => Err(network_error(&format!("looking up {name}"), &e)),
        }
    }

    /// Creates a veth pair named `name` / `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_veth(&self, name: &str, peer: &str) -> Result<()> {
        self.block_on(
            self.handle
                .link()
                .add()
                .veth(name.to_string(), peer.to_string())
                .execute(),
        )
        .map_err(|e| network_error(&format!("creating veth {name}/{peer}"), &e))
    }

    /// Deletes the link at `index` (and its veth peer with it).
    ///
    /// A link that no longer exists is reported as [`LinkRemoval::AlreadyGone`]:
    /// the kernel drops a veth pair together with the namespace holding
    /// either end.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request for any other reason.
    pub fn delete_link(&self, index: u32) -> Result<LinkRemoval> {
        match self.block_on(self.handle.link().del(index).execute()) {
            Ok(()) => Ok(LinkRemoval::Deleted),
            Err(e) if errno_of(&e) == Some(libc::ENODEV) => Ok(LinkRemoval::AlreadyGone),
            Err(e) => Err(network_error(&format!("deleting link {index}"), &e)),
        }
    }

    /// Brings the link at `index` up.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn set_up(&self, index: u32) -> Result<()> {
        self.block_on(self.handle.link().set(index).up().execute())
            .map_err(|e| network_error(&format!("bringing up link {index}"), &e))
    }

    /// Renames the link at `index`; the link must be down.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn rename(&self, index: u32, name: &str) -> Result<()> {
        self.block_on(self.handle.link().set(index).name(name.to_string()).execute())
            .map_err(|e| network_error(&format!("renaming link {index} to {name}"), &e))
    }

    /// Moves the link at `index` into the network namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn move_to_namespace_of(&self, index: u32, pid: u32) -> Result<()> {
        self.block_on(self.handle.link().set(index).setns_by_pid(pid).execute())
            .map_err(|e| network_error(&format!("moving link {index} to netns of {pid}"), &e))
    }

    /// Assigns `address/prefix_len` to the link at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_address(&self, index: u32, address: Ipv4Addr, prefix_len: u8) -> Result<()> {
        self.block_on(
            self.handle
                .address()
                .add(index, IpAddr::V4(address), prefix_len)
                .execute(),
        )
        .map_err(|e| network_error(&format!("assigning {address}/{prefix_len}"), &e))
    }

    /// Installs a default route via `gateway`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    pub fn add_default_route(&self, gateway: Ipv4Addr) -> Result<()> {
        self.block_on(self.handle.route().add().v4().gateway(gateway).execute())
            .map_err(|e| network_error(&format!("adding default route via {gateway}"), &e))
    }
}

fn network_error(action: &str, e: &rtnetlink::Error) -> CorralError {
    CorralError::Network {
        message: format!("{action}: {e}"),
    }
}

/// Errno carried by a kernel rejection, if the error is one.
fn errno_of(e: &rtnetlink::Error) -> Option<i32> {
    match e {
        rtnetlink::Error::NetlinkError(message) => message.to_io().raw_os_error(),
        _ => None,
    }
}

fn not_found(name: &str) -> CorralError {
    CorralError::Network {
        message: format!("interface {name} not found"),
    }
}
