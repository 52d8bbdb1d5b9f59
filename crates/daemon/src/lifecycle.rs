// SPDX-License-Identifier: MIT

//! Daemon startup and shutdown: acquire an exclusive lock file first (so
//! two daemons racing for the same state dir fail cleanly), write
//! directories and a PID, rebuild the runtime fleet from disk, and only
//! then bind the control socket.

use std::fs::File;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use sl_engine::{build_runtime, BufferPool, RuntimeManager};
use sl_storage::PersistenceStore;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another daemon already holds the lock at {0}")]
    LockFailed(std::path::PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of a successful startup: the running pieces `main` wires
/// together, plus the lock file (held for the process lifetime; dropping
/// it releases the lock).
pub struct StartupResult {
    pub manager: Arc<RuntimeManager>,
    pub listener: UnixListener,
    #[allow(dead_code)]
    lock_file: File,
}

/// Default buffer pool sizing for the reactor's provided-buffer-ring
/// equivalent.
const BUFFER_POOL_COUNT: usize = 256;
const BUFFER_POOL_SIZE: usize = 64 * 1024;

pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(&config.runtimes_dir)?;

    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(|_| LifecycleError::LockFailed(config.lock_path.clone()))?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    let store = PersistenceStore::new(&config.runtimes_dir);
    let buffers = Arc::new(BufferPool::new(BUFFER_POOL_COUNT, BUFFER_POOL_SIZE));
    let manager = RuntimeManager::new(store, buffers);

    let configs = manager.store().load_all();
    let mut loaded = 0;
    let mut to_restart = Vec::new();
    for cfg in configs {
        let name = cfg.name.clone();
        let was_running = cfg.was_running;
        let owner = cfg.owner.clone();
        let child_policy = cfg.child_policy;
        let runtime = build_runtime(cfg);
        manager.register(runtime, owner, child_policy);
        loaded += 1;
        if was_running {
            to_restart.push(name);
        }
    }
    info!(loaded, restarting = to_restart.len(), "loaded persisted runtime configs");

    for name in to_restart {
        if let Err(err) = manager.start(&name).await {
            warn!(name, %err, "failed to restart runtime from persisted state");
        }
    }

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)?;
    std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o666))?;
    info!(socket = %config.socket_path.display(), "control-plane socket ready");

    Ok(StartupResult { manager, listener, lock_file })
}

/// Stop every running runtime and persist `was_running = false` for each,
/// so a clean shutdown doesn't auto-resume anything on the next startup.
pub async fn shutdown(manager: &RuntimeManager) {
    info!("shutting down: stopping all runtimes");
    manager.stop_all().await;
}

/// Clean up the lock/socket files created by a startup attempt that failed
/// after acquiring them (not called when the lock itself was contested —
/// those files belong to the daemon that's already running).
pub fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    let _ = std::fs::remove_file(&config.lock_path);
}
