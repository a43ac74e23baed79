//! A burst of SIGINTs never stops the relay from forwarding.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command};

use corral_runtime::relay::{ChildSlot, SignalRelay};
use nix::sys::signal::{Signal, raise};
use nix::unistd::Pid;

fn sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
}

fn pid_of(child: &Child) -> Pid {
    Pid::from_raw(i32::try_from(child.id()).unwrap())
}

#[test]
fn relay_keeps_forwarding_after_a_burst() {
    let slot = ChildSlot::new();
    let relay = SignalRelay::forward_to(slot.clone()).unwrap();

    let mut first = sleeper();
    slot.publish(pid_of(&first));
    raise(Signal::SIGINT).unwrap();
    raise(Signal::SIGINT).unwrap();
    raise(Signal::SIGINT).unwrap();
    assert_eq!(first.wait().unwrap().signal(), Some(libc::SIGINT));

    // Anything left of the burst may reach this child too; either way it
    // must end by SIGINT, which only the relay delivers.
    let mut second = sleeper();
    slot.publish(pid_of(&second));
    raise(Signal::SIGINT).unwrap();
    assert_eq!(second.wait().unwrap().signal(), Some(libc::SIGINT));

    slot.clear();
    relay.close();
}
