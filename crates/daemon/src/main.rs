// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! `socketleyd`: the daemon binary. Wires together config loading,
//! `lifecycle::startup` (lock file, persisted-runtime restore, control
//! socket bind), the control-plane accept loop, and graceful shutdown on
//! `SIGINT`/`SIGTERM`/`SIGHUP`.

mod config;
mod control;
mod flags;
mod lifecycle;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() {
    // SIGPIPE: the Rust runtime already installs `SIG_IGN` for
    // it at process startup, so a write to a peer that closed its read
    // side surfaces as an `EPIPE` I/O error rather than killing the
    // process — nothing further to do here.

    let config = Config::load();
    let _log_guard = init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "starting socketleyd");

    let started = match lifecycle::startup(&config).await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "daemon startup failed");
            std::process::exit(1);
        }
    };

    let manager = started.manager;
    let listener = started.listener;

    let accept_manager = Arc::clone(&manager);
    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let manager = Arc::clone(&accept_manager);
                    tokio::spawn(control::handle_connection(stream, manager));
                }
                Err(err) => warn!(error = %err, "control socket accept failed"),
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    accept_task.abort();
    lifecycle::shutdown(&manager).await;
    lifecycle::cleanup_on_failure(&config);
    info!("socketleyd exiting");
}

/// `SIGINT`, `SIGTERM`, and `SIGHUP` all request a graceful shutdown.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGHUP handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
}

/// Structured logging to a daily-rotated file under the state dir, mirrored
/// to stdout. Returns the `tracing-appender` worker guard, which must stay
/// alive for the process lifetime to flush on exit.
fn init_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let _ = std::fs::create_dir_all(&config.state_dir);
    let file_appender = tracing_appender::rolling::daily(&config.state_dir, "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    guard
}
