//! Behaviour of the `corral` binary.
//!
//! Tests marked `#[ignore]` start real containers: they need root and a
//! prepared root filesystem in `CORRAL_TEST_ROOTFS`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use corral_common::config::RuntimeConfig;
use corral_common::types::ContainerId;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

fn corral() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_corral"));
    let _ = cmd
        .env_remove("CORRAL_ROOTFS")
        .env_remove("CORRAL_HOSTNAME")
        .env_remove("CORRAL_PIDS_MAX");
    cmd
}

fn test_rootfs() -> PathBuf {
    PathBuf::from(std::env::var("CORRAL_TEST_ROOTFS").expect("CORRAL_TEST_ROOTFS must be set"))
}

fn cgroup_dirs(name: &str) -> [PathBuf; 2] {
    let root = Path::new("/sys/fs/cgroup");
    [root.join(name), root.join("pids").join(name)]
}

fn host_link_exists(instance: &str) -> bool {
    let config = RuntimeConfig::for_instance(ContainerId::new(instance), "/");
    Path::new("/sys/class/net").join(config.network.host_interface).exists()
}

#[test]
fn help_hides_internal_stages() {
    let output = corral().arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("run"));
    assert!(!help.contains("workload"));
    assert!(!help.contains("init"));
}

#[test]
fn run_without_rootfs_fails() {
    let output = corral().args(["run", "--", "/bin/true"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("root filesystem"), "{stderr}");
}

#[test]
fn invalid_configuration_fails_before_setup() {
    let output = corral()
        .args(["run", "--rootfs", "/nonexistent", "--pids-max", "0", "--", "/bin/true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pids ceiling"), "{stderr}");
}

#[test]
fn init_stage_outside_pid_namespace_is_a_no_op() {
    let config = RuntimeConfig::for_instance(ContainerId::new("noop"), "/nonexistent");
    let status = corral()
        .args(["init", "--config", &config.to_json().unwrap(), "--", "/bin/true"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn malformed_stage_configuration_fails() {
    let status = corral()
        .args(["workload", "--config", "{not json", "--", "/bin/true"])
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
#[ignore = "needs root and CORRAL_TEST_ROOTFS"]
fn echo_runs_and_cleans_up() {
    let output = corral()
        .args(["run", "--name", "e2eecho", "--rootfs"])
        .arg(test_rootfs())
        .args(["--", "/bin/echo", "hello"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    for dir in cgroup_dirs("corral-e2eecho") {
        assert!(!dir.exists(), "{} left behind", dir.display());
    }
    assert!(!host_link_exists("e2eecho"));
}

#[test]
#[ignore = "needs root and CORRAL_TEST_ROOTFS"]
fn exit_code_is_propagated() {
    let status = corral()
        .args(["run", "--name", "e2eexit", "--rootfs"])
        .arg(test_rootfs())
        .args(["--", "/bin/sh", "-c", "exit 3"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));
}

#[test]
#[ignore = "needs root and CORRAL_TEST_ROOTFS"]
fn interrupt_cancels_the_command() {
    let child = corral()
        .args(["run", "--name", "e2eint", "--rootfs"])
        .arg(test_rootfs())
        .args(["--", "/bin/sleep", "300"])
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_secs(1));
    kill(Pid::from_raw(i32::try_from(child.id()).unwrap()), Signal::SIGINT).unwrap();

    let started = Instant::now();
    let output = child.wait_with_output().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(output.status.code(), Some(137));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cancellation"), "{stderr}");
    for dir in cgroup_dirs("corral-e2eint") {
        assert!(!dir.exists(), "{} left behind", dir.display());
    }
}

#[test]
#[ignore = "needs root"]
fn missing_rootfs_leaves_nothing_behind() {
    let status = corral()
        .args(["run", "--name", "e2emiss", "--rootfs", "/nonexistent/rootfs"])
        .args(["--", "/bin/true"])
        .status()
        .unwrap();
    assert_ne!(status.code(), Some(0));
    for dir in cgroup_dirs("corral-e2emiss") {
        assert!(!dir.exists(), "{} left behind", dir.display());
    }
    assert!(!host_link_exists("e2emiss"));
}

#[test]
#[ignore = "needs root and CORRAL_TEST_ROOTFS"]
fn instances_with_similar_names_run_side_by_side() {
    let first = corral()
        .args(["run", "--name", "webserver-a", "--rootfs"])
        .arg(test_rootfs())
        .args(["--", "/bin/sleep", "3"])
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_millis(500));
    let second = corral()
        .args(["run", "--name", "webserver-b", "--rootfs"])
        .arg(test_rootfs())
        .args(["--", "/bin/echo", "hi"])
        .output()
        .unwrap();
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(first.wait_with_output().unwrap().status.code(), Some(0));
}
