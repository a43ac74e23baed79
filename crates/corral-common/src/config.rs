//! Runtime configuration model shared by every pipeline stage.
//!
//! The Launcher resolves one [`RuntimeConfig`] per container instance and
//! hands it down each re-exec as JSON, so all stages agree on device names,
//! addresses and the cgroup they own.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    CGROUP_NAME_PREFIX, CGROUP_ROOT, DEFAULT_CONTAINER_ADDRESS, DEFAULT_HOST_ADDRESS,
    DEFAULT_HOSTNAME, DEFAULT_PIDS_MAX, DEFAULT_PREFIX_LEN, DEFAULT_PRIMARY_INTERFACE,
    MAX_INTERFACE_NAME,
};
use crate::error::{CorralError, Result};
use crate::types::{ContainerId, IdMapping, NamespaceSet};

/// Which namespaces to create and how to map identities into them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationProfile {
    /// Namespaces requested for the namespaced child.
    pub namespaces: NamespaceSet,
    /// UID/GID mapping written when a user namespace is requested.
    pub id_mapping: Option<IdMapping>,
}

/// Host/container point-to-point link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Whether the veth link is created at all.
    pub enabled: bool,
    /// Name of the veth end that stays on the host.
    pub host_interface: String,
    /// Name of the veth end relocated into the container before renaming.
    pub container_interface: String,
    /// Name the container end is given inside the namespace.
    pub primary_interface: String,
    /// Address of the host end; also the container's default gateway.
    pub host_address: Ipv4Addr,
    /// Address of the container end.
    pub container_address: Ipv4Addr,
    /// Prefix length shared by both addresses.
    pub prefix_len: u8,
}

impl NetworkConfig {
    /// Link settings with device names derived from the instance id.
    #[must_use]
    pub fn for_instance(id: &ContainerId) -> Self {
        let tag = id.short();
        Self {
            enabled: true,
            host_interface: format!("vh-{tag}"),
            container_interface: format!("vc-{tag}"),
            primary_interface: DEFAULT_PRIMARY_INTERFACE.to_string(),
            host_address: Ipv4Addr::from(DEFAULT_HOST_ADDRESS),
            container_address: Ipv4Addr::from(DEFAULT_CONTAINER_ADDRESS),
            prefix_len: DEFAULT_PREFIX_LEN,
        }
    }

    /// Network mask derived from the prefix length.
    #[must_use]
    pub fn netmask(&self) -> Ipv4Addr {
        let bits = u32::MAX
            .checked_shl(32 - u32::from(self.prefix_len))
            .unwrap_or(0);
        Ipv4Addr::from(bits)
    }

    /// Whether both link ends sit in the same subnet.
    #[must_use]
    pub fn same_subnet(&self) -> bool {
        let mask = u32::from(self.netmask());
        u32::from(self.host_address) & mask == u32::from(self.container_address) & mask
    }

    fn validate(&self) -> Result<()> {
        for name in [
            &self.host_interface,
            &self.container_interface,
            &self.primary_interface,
        ] {
            if name.is_empty() || name.len() > MAX_INTERFACE_NAME {
                return Err(CorralError::Config {
                    message: format!(
                        "interface name {name:?} must be 1..={MAX_INTERFACE_NAME} bytes"
                    ),
                });
            }
        }
        if self.host_interface == self.container_interface {
            return Err(CorralError::Config {
                message: "host and container interface names must differ".into(),
            });
        }
        if self.prefix_len == 0 || self.prefix_len > 30 {
            return Err(CorralError::Config {
                message: format!("prefix length /{} leaves no room for two hosts", self.prefix_len),
            });
        }
        if self.host_address == self.container_address {
            return Err(CorralError::Config {
                message: format!("host and container share address {}", self.host_address),
            });
        }
        if !self.same_subnet() {
            return Err(CorralError::Config {
                message: format!(
                    "{} and {} are not in the same /{} subnet",
                    self.host_address, self.container_address, self.prefix_len
                ),
            });
        }
        Ok(())
    }
}

/// Resource-limited control group settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupConfig {
    /// Whether the workload is placed in a cgroup.
    pub enabled: bool,
    /// Mount point of the cgroup filesystem.
    pub root: PathBuf,
    /// Name of the group directory.
    pub name: String,
    /// Hard ceiling on concurrent processes in the group.
    pub pids_max: u64,
}

impl CgroupConfig {
    /// Cgroup settings with a group name derived from the instance id.
    #[must_use]
    pub fn for_instance(id: &ContainerId) -> Self {
        Self {
            enabled: true,
            root: PathBuf::from(CGROUP_ROOT),
            name: format!("{CGROUP_NAME_PREFIX}-{id}"),
            pids_max: DEFAULT_PIDS_MAX,
        }
    }
}

/// Complete, resolved configuration of one container instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Identity every derived resource name is keyed by.
    pub id: ContainerId,
    /// Pre-provisioned root filesystem tree.
    pub rootfs: PathBuf,
    /// Hostname set inside the UTS namespace.
    pub hostname: String,
    /// Namespaces and identity mapping.
    pub isolation: IsolationProfile,
    /// Host/container link.
    pub network: NetworkConfig,
    /// Process-count limiting.
    pub cgroup: CgroupConfig,
}

impl RuntimeConfig {
    /// Privileged profile for a fresh instance.
    #[must_use]
    pub fn for_instance(id: ContainerId, rootfs: impl Into<PathBuf>) -> Self {
        Self {
            network: NetworkConfig::for_instance(&id),
            cgroup: CgroupConfig::for_instance(&id),
            id,
            rootfs: rootfs.into(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            isolation: IsolationProfile::default(),
        }
    }

    /// Rootless profile: the invoking user becomes root in a user namespace.
    ///
    /// Writing cgroup files and creating host devices both need privileges
    /// the caller does not have, so neither is attempted.
    #[must_use]
    pub fn rootless(id: ContainerId, rootfs: impl Into<PathBuf>, mapping: IdMapping) -> Self {
        let mut config = Self::for_instance(id, rootfs);
        config.isolation = IsolationProfile {
            namespaces: NamespaceSet::rootless(),
            id_mapping: Some(mapping),
        };
        config.network.enabled = false;
        config.cgroup.enabled = false;
        config
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CorralError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Serializes the configuration for handing to the next stage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a configuration handed down by the previous stage.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether the veth link is plumbed for this instance.
    #[must_use]
    pub const fn network_enabled(&self) -> bool {
        self.network.enabled && self.isolation.namespaces.network
    }

    /// Checks the configuration for values the kernel would reject or that
    /// would leave the container half isolated.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(CorralError::Config {
                message: "hostname must not be empty".into(),
            });
        }
        if self.rootfs.as_os_str().is_empty() {
            return Err(CorralError::Config {
                message: "root filesystem path must not be empty".into(),
            });
        }
        let ns = &self.isolation.namespaces;
        if ns.user && self.isolation.id_mapping.is_none() {
            return Err(CorralError::Config {
                message: "user namespace requested without a UID/GID mapping".into(),
            });
        }
        if self.network.enabled && !ns.network {
            return Err(CorralError::Config {
                message: "network link requested without a network namespace".into(),
            });
        }
        if self.network.enabled {
            self.network.validate()?;
        }
        if self.cgroup.enabled {
            if self.cgroup.pids_max == 0 {
                return Err(CorralError::Config {
                    message: "pids ceiling must be at least 1".into(),
                });
            }
            if self.cgroup.name.is_empty() || self.cgroup.name.contains('/') {
                return Err(CorralError::Config {
                    message: format!("invalid cgroup name {:?}", self.cgroup.name),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig::for_instance(ContainerId::new("0123456789abcdef"), "/srv/rootfs")
    }

    #[test]
    fn derived_names_are_unique_per_instance() {
        let a = config();
        let b = RuntimeConfig::for_instance(ContainerId::new("fedcba9876543210"), "/srv/rootfs");
        assert_eq!(a.network.host_interface, "vh-9f9f5111");
        assert_eq!(a.network.container_interface, "vc-9f9f5111");
        assert_eq!(a.cgroup.name, "corral-0123456789abcdef");
        assert_ne!(a.network.host_interface, b.network.host_interface);
        assert_ne!(a.cgroup.name, b.cgroup.name);
    }

    #[test]
    fn similar_names_do_not_share_links() {
        let a = RuntimeConfig::for_instance(ContainerId::new("webserver-a"), "/srv/rootfs");
        let b = RuntimeConfig::for_instance(ContainerId::new("webserver-b"), "/srv/rootfs");
        assert_ne!(a.network.host_interface, b.network.host_interface);
        assert_ne!(a.network.container_interface, b.network.container_interface);
        a.validate().unwrap();
    }

    #[test]
    fn defaults_validate() {
        config().validate().unwrap();
        assert_eq!(config().cgroup.pids_max, 20);
    }

    #[test]
    fn rootless_profile_drops_privileged_resources() {
        let mapping = IdMapping {
            host_uid: 1000,
            host_gid: 1000,
        };
        let cfg = RuntimeConfig::rootless(ContainerId::new("abc"), "/srv/rootfs", mapping);
        assert!(cfg.isolation.namespaces.user);
        assert!(!cfg.network_enabled());
        assert!(!cfg.cgroup.enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_user_namespace_without_mapping() {
        let mut cfg = config();
        cfg.isolation.namespaces.user = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_addresses_in_different_subnets() {
        let mut cfg = config();
        cfg.network.container_address = Ipv4Addr::new(10, 0, 0, 2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_overlong_interface_name() {
        let mut cfg = config();
        cfg.network.host_interface = "veth-host-far-too-long".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_network_link_without_namespace() {
        let mut cfg = config();
        cfg.isolation.namespaces.network = false;
        assert!(cfg.validate().is_err());
        cfg.network.enabled = false;
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_zero_pids_ceiling() {
        let mut cfg = config();
        cfg.cgroup.pids_max = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn netmask_from_prefix() {
        let mut net = config().network;
        assert_eq!(net.netmask(), Ipv4Addr::new(255, 255, 255, 0));
        net.prefix_len = 30;
        assert_eq!(net.netmask(), Ipv4Addr::new(255, 255, 255, 252));
    }

    #[test]
    fn json_handoff_preserves_everything() {
        let cfg = config();
        let back = RuntimeConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.json");
        std::fs::write(&path, config().to_json().unwrap()).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap(), config());
        assert!(RuntimeConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
