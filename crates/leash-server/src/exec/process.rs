//! Child processes for the local strategies
//!
//! The shell started for a call can start children of its own, which
//! outlive it once the shell is killed. Each shell therefore leads a fresh
//! process group, and a call that is dropped before the shell finishes
//! (timeout or cancellation) takes the whole group down with it.

use std::io;
use std::process::Output;

use tokio::process::Command;

/// Spawn `command` in its own process group and collect its output
///
/// If the returned future is dropped early, every process in the group is
/// sent SIGKILL.
pub(crate) async fn output_in_group(command: &mut Command) -> io::Result<Output> {
    #[cfg(unix)]
    command.process_group(0);
    command.kill_on_drop(true);

    let child = command.spawn()?;
    let group = GroupKill::new(child.id());
    let output = child.wait_with_output().await;
    group.disarm();
    output
}

/// Kills a process group on drop unless disarmed
struct GroupKill {
    /// Group id; equal to the leader's pid since it was spawned with group 0
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The shell finished on its own; leave whatever it started alone
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid.take() {
                // SAFETY: killpg takes plain integers and only sends a signal.
                // The leader is not reaped yet, so the id still names our group.
                let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
                if rc == 0 {
                    tracing::debug!("Killed process group {}", pgid);
                }
            }
        }
    }
}
