//! Escalating encoder termination.
//!
//! One explicit sequence of termination strategies tried in order, each with
//! its own bounded wait: in-band quit on the control channel, graceful
//! signal, forceful kill through the process handle, and finally an OS-level
//! force kill of the pid and any residual children. Idempotent and safe to
//! call on an empty slot or an already-exited process.

use crate::launch::Session;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tracing::{debug, error, info, warn};

/// Owns graceful-then-forceful termination of the encoder process.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    /// Wait after the in-band quit request.
    pub quit_wait: Duration,
    /// Wait after the graceful termination signal.
    pub term_wait: Duration,
    /// Wait after each forceful kill.
    pub kill_wait: Duration,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self {
            quit_wait: Duration::from_secs(3),
            term_wait: Duration::from_secs(10),
            kill_wait: Duration::from_secs(5),
        }
    }
}

impl LifecycleController {
    pub fn new(quit_wait: Duration, term_wait: Duration, kill_wait: Duration) -> Self {
        Self {
            quit_wait,
            term_wait,
            kill_wait,
        }
    }

    /// Terminate the session in `slot`, releasing the handle only after the
    /// process is confirmed stopped. A `None` slot or an already-exited
    /// process is a no-op, so calling this twice never double-kills.
    pub async fn terminate(&self, slot: &mut Option<Session>) {
        let Some(mut session) = slot.take() else {
            debug!("no live session to terminate");
            return;
        };

        let pid = session.child.id();
        let session_id = session.id;

        if let Ok(Some(exit)) = session.child.try_wait() {
            info!(session = %session_id, code = ?exit.code(), "encoder already exited");
            self.cleanup(session, pid).await;
            return;
        }

        info!(session = %session_id, pid = ?pid, "terminating encoder");

        // Step 1: in-band quit on the control channel.
        if let Some(mut stdin) = session.child.stdin.take() {
            let sent = stdin.write_all(b"q").await.is_ok();
            let _ = stdin.shutdown().await;
            drop(stdin);
            if sent && wait_for_exit(&mut session.child, self.quit_wait).await {
                info!(session = %session_id, "encoder quit on in-band request");
                self.cleanup(session, pid).await;
                return;
            }
            debug!("encoder ignored in-band quit request");
        }

        // Step 2: graceful termination signal.
        if let Some(pid) = pid {
            if signal_process(pid, Signal::Term) {
                if wait_for_exit(&mut session.child, self.term_wait).await {
                    info!(session = %session_id, "encoder stopped on termination signal");
                    self.cleanup(session, Some(pid)).await;
                    return;
                }
                warn!(
                    pid,
                    wait_secs = self.term_wait.as_secs(),
                    "encoder did not stop on termination signal"
                );
            }
        }

        // Step 3: forceful kill through the handle.
        if session.child.start_kill().is_ok()
            && wait_for_exit(&mut session.child, self.kill_wait).await
        {
            warn!(session = %session_id, "encoder stopped only on forceful kill");
            self.cleanup(session, pid).await;
            return;
        }

        // Step 4: OS-level force kill as last resort.
        error!(session = %session_id, pid = ?pid, "escalating to OS-level force kill");
        if let Some(pid) = pid {
            force_kill(pid);
        }
        if !wait_for_exit(&mut session.child, self.kill_wait).await {
            // Nothing left to try; surface it loudly instead of spinning.
            error!(
                session = %session_id,
                pid = ?pid,
                "encoder still running after OS-level force kill"
            );
        }
        self.cleanup(session, pid).await;
    }

    /// Reap the process, sweep residual children, and join the reader task.
    async fn cleanup(&self, mut session: Session, pid: Option<u32>) {
        let _ = session.child.wait().await;
        if let Some(pid) = pid {
            kill_residual_children(pid);
        }
        if tokio::time::timeout(Duration::from_secs(5), session.reader)
            .await
            .is_err()
        {
            warn!("diagnostic reader did not finish in time");
        }
        debug!("session cleanup complete");
    }
}

/// Wait up to `limit` for the child to exit.
async fn wait_for_exit(child: &mut Child, limit: Duration) -> bool {
    tokio::time::timeout(limit, child.wait()).await.is_ok()
}

/// Send a signal to the process if it still exists.
fn signal_process(pid: u32, signal: Signal) -> bool {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]));
    match sys.process(target) {
        Some(process) => process.kill_with(signal).unwrap_or(false),
        None => false,
    }
}

/// OS-level force kill of the pid itself.
fn force_kill(pid: u32) {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]));
    if let Some(process) = sys.process(target) {
        process.kill();
    }
}

/// Enumerate and kill any processes the encoder spawned transitively.
fn kill_residual_children(pid: u32) {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All);
    let target = Pid::from_u32(pid);
    for (child_pid, process) in sys.processes() {
        if process.parent() == Some(target) {
            warn!(pid = child_pid.as_u32(), "killing residual encoder child process");
            process.kill();
        }
    }
}
