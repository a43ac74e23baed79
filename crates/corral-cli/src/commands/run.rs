//! `corral run`: start a container and wait for it.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_common::types::{ContainerId, IdMapping};
use corral_runtime::launcher;

/// Arguments for the `run` command.
#[allow(clippy::struct_excessive_bools)]
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON configuration file; flags below override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root filesystem the container is confined to.
    #[arg(long, env = "CORRAL_ROOTFS", value_name = "DIR")]
    pub rootfs: Option<PathBuf>,

    /// Hostname inside the container.
    #[arg(long, env = "CORRAL_HOSTNAME")]
    pub hostname: Option<String>,

    /// Instance identifier used to name the veth pair and cgroup.
    #[arg(long, value_name = "ID", conflicts_with = "config")]
    pub name: Option<String>,

    /// Ceiling on the number of processes in the container.
    #[arg(long, env = "CORRAL_PIDS_MAX", value_name = "N")]
    pub pids_max: Option<u64>,

    /// Address of the host end of the link.
    #[arg(long, value_name = "IP")]
    pub host_ip: Option<Ipv4Addr>,

    /// Address of the container end of the link.
    #[arg(long, value_name = "IP")]
    pub container_ip: Option<Ipv4Addr>,

    /// Prefix length of the link's subnet.
    #[arg(long, value_name = "N")]
    pub prefix_len: Option<u8>,

    /// Do not create the veth link.
    #[arg(long)]
    pub no_network: bool,

    /// Do not limit the process count.
    #[arg(long)]
    pub no_cgroup: bool,

    /// Map the invoking user to root in a user namespace; implies
    /// `--no-network` and `--no-cgroup`.
    #[arg(long, conflicts_with = "config")]
    pub rootless: bool,

    /// Command to run inside the container, with its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Resolves the configuration: defaults, then the file, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or no root filesystem
    /// is given anywhere.
    pub fn resolve(&self) -> anyhow::Result<RuntimeConfig> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => {
                let rootfs = self
                    .rootfs
                    .clone()
                    .context("a root filesystem is required (--rootfs or CORRAL_ROOTFS)")?;
                let id = self
                    .name
                    .as_deref()
                    .map_or_else(ContainerId::generate, ContainerId::new);
                if self.rootless {
                    let mapping = IdMapping {
                        host_uid: nix::unistd::getuid().as_raw(),
                        host_gid: nix::unistd::getgid().as_raw(),
                    };
                    RuntimeConfig::rootless(id, rootfs, mapping)
                } else {
                    RuntimeConfig::for_instance(id, rootfs)
                }
            }
        };

        if let Some(rootfs) = &self.rootfs {
            config.rootfs.clone_from(rootfs);
        }
        if let Some(hostname) = &self.hostname {
            config.hostname.clone_from(hostname);
        }
        if let Some(pids_max) = self.pids_max {
            config.cgroup.pids_max = pids_max;
        }
        if let Some(ip) = self.host_ip {
            config.network.host_address = ip;
        }
        if let Some(ip) = self.container_ip {
            config.network.container_address = ip;
        }
        if let Some(prefix_len) = self.prefix_len {
            config.network.prefix_len = prefix_len;
        }
        if self.no_network {
            config.network.enabled = false;
        }
        if self.no_cgroup {
            config.cgroup.enabled = false;
        }
        Ok(config)
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the container could
/// not be started.
pub fn execute(args: RunArgs) -> anyhow::Result<u8> {
    let config = args.resolve()?;
    let status = launcher::run(&config, &args.command)
        .with_context(|| format!("container {} failed to start", config.id))?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(std::iter::once("corral").chain(args.iter().copied())).unwrap();
        match cli.command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn command_after_separator_is_kept_verbatim() {
        let args = parse(&["run", "--rootfs", "/srv/rootfs", "--", "sh", "-c", "echo hi"]);
        assert_eq!(args.command, ["sh", "-c", "echo hi"]);
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&[
            "run",
            "--rootfs",
            "/srv/rootfs",
            "--name",
            "web",
            "--hostname",
            "box",
            "--pids-max",
            "5",
            "--no-network",
            "--",
            "/bin/true",
        ]);
        let config = args.resolve().unwrap();
        assert_eq!(config.id.as_str(), "web");
        assert_eq!(config.hostname, "box");
        assert_eq!(config.cgroup.pids_max, 5);
        assert!(!config.network_enabled());
        assert!(config.cgroup.enabled);
    }

    #[test]
    fn rootless_maps_invoking_user() {
        let args = parse(&["run", "--rootfs", "/srv/rootfs", "--rootless", "--", "/bin/true"]);
        let config = args.resolve().unwrap();
        let mapping = config.isolation.id_mapping.unwrap();
        assert_eq!(mapping.host_uid, nix::unistd::getuid().as_raw());
        assert!(!config.cgroup.enabled);
        assert!(!config.network_enabled());
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.json");
        let base = RuntimeConfig::for_instance(ContainerId::new("fromfile"), "/srv/base");
        std::fs::write(&path, base.to_json().unwrap()).unwrap();

        let path_arg = path.to_str().unwrap();
        let args = parse(&["run", "--config", path_arg, "--rootfs", "/srv/other", "--", "/bin/true"]);
        let config = args.resolve().unwrap();
        assert_eq!(config.id.as_str(), "fromfile");
        assert_eq!(config.rootfs, PathBuf::from("/srv/other"));
        assert_eq!(config.network, base.network);
    }

    #[test]
    fn missing_command_is_a_usage_error() {
        let argv = ["corral", "run", "--rootfs", "/srv/rootfs"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
