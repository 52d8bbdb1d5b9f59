// SPDX-License-Identifier: MIT

//! External runtime launching: a "server" runtime whose
//! `external` field is set doesn't bind a socket itself — it forks a child
//! process (`exec_path`) that's expected to bind and run independently, and
//! the daemon only tracks its lifetime.
//!
//! Rendered as `tokio::process::Command` plus an explicit
//! `waitpid(WNOHANG)` reap before every spawn, since tokio's own child
//! reaping only covers children it spawned itself in-process.

use std::path::Path;

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

/// Reap any already-exited managed children without blocking, so a crashed
/// external process doesn't leave a zombie around across spawns.
pub fn reap_exited_children() {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => info!(pid = pid.as_raw(), code, "reaped external runtime"),
            Ok(WaitStatus::Signaled(pid, sig, _)) => warn!(pid = pid.as_raw(), ?sig, "external runtime killed by signal"),
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
            #[allow(unreachable_patterns)]
            _ => break,
        }
    }
}

/// Spawn `exec_path` as a managed external runtime, setting the
/// `SOCKETLEY_MANAGED`/`SOCKETLEY_NAME` env vars so the child can identify
/// itself back to the daemon over the control socket if it wants to.
pub fn spawn_managed(exec_path: &Path, name: &str) -> EngineResult<Child> {
    reap_exited_children();
    Command::new(exec_path)
        .env("SOCKETLEY_MANAGED", "1")
        .env("SOCKETLEY_NAME", name)
        .kill_on_drop(false)
        .spawn()
        .map_err(|source| EngineError::Setup(format!("spawning {}: {source}", exec_path.display())))
}

/// Send `SIGTERM` to a managed or attached external process.
pub fn terminate(pid: u32) -> EngineResult<()> {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|errno| EngineError::Setup(format!("SIGTERM to pid {pid} failed: {errno}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_managed_rejects_missing_binary() {
        let result = spawn_managed(Path::new("/no/such/binary-xyz"), "t");
        assert!(result.is_err());
    }
}
