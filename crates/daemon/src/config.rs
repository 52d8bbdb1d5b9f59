// SPDX-License-Identifier: MIT

//! Daemon configuration: where the control socket, lock file, and
//! per-runtime config directory live. The control socket defaults
//! to `/tmp/socketley.sock` with `0666` permissions.

use std::path::PathBuf;

/// Default control socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/socketley.sock";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the lock file, log file, and `runtimes/` configs.
    pub state_dir: PathBuf,
    /// Control-plane Unix socket path.
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub runtimes_dir: PathBuf,
}

impl Config {
    /// Load configuration, honoring `SOCKETLEY_SOCKET`/`SOCKETLEY_STATE_DIR`
    /// overrides and falling back to the documented defaults.
    pub fn load() -> Self {
        let state_dir = std::env::var("SOCKETLEY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::state_dir().unwrap_or_else(std::env::temp_dir).join("socketley"));

        let socket_path =
            std::env::var("SOCKETLEY_SOCKET").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH));

        Self {
            lock_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            runtimes_dir: state_dir.join("runtimes"),
            socket_path,
            state_dir,
        }
    }
}
