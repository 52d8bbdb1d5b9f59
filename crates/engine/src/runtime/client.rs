// SPDX-License-Identifier: MIT

//! The client runtime: maintains one outbound TCP or UDP
//! connection to `target`, reconnecting with exponential backoff
//! ([`sl_core::timer::reconnect_backoff`]) when the connection drops, up to
//! `reconnect` attempts (`-1` disables reconnect, `0` means unlimited).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sl_core::hook::HookTable;
use sl_core::model::{RuntimeConfig, RuntimeState};
use sl_core::timer::reconnect_backoff;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::error::{EngineError, EngineResult};
use crate::outbound::{self, OutboundSender};
use crate::runtime::{Runtime, RuntimeBase};

struct Shared {
    outbound: Mutex<Option<OutboundSender>>,
    connected: AtomicBool,
}

pub struct ClientRuntime {
    base: RuntimeBase,
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
}

impl ClientRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            base: RuntimeBase::new(config),
            shared: Arc::new(Shared { outbound: Mutex::new(None), connected: AtomicBool::new(false) }),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Queue a message to send on the outbound connection, if any.
    pub fn send(&self, message: &[u8]) -> bool {
        match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.push_owned(message.to_vec()),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl Runtime for ClientRuntime {
    fn base(&self) -> &RuntimeBase {
        &self.base
    }

    async fn setup(&self, _ctx: RuntimeContext) -> EngineResult<()> {
        let config = self.base.config.read().clone();
        let target = config.target.clone().ok_or_else(|| EngineError::Setup("client runtime has no target".into()))?;

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let name = config.name.clone();
        let reconnect_limit = config.reconnect;
        let udp = config.udp;
        let hooks = self.base.hooks.clone();

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let connected = run_connection(&target, udp, &shared, &shutdown, &hooks).await;
                if connected {
                    attempt = 0;
                } else {
                    warn!(name = %name, attempt, "client connect failed");
                    attempt += 1;
                }

                if reconnect_limit < 0 {
                    break;
                }
                if reconnect_limit > 0 && attempt as i32 >= reconnect_limit {
                    warn!(name = %name, "client runtime exhausted reconnect attempts");
                    break;
                }
                tokio::time::sleep(reconnect_backoff(attempt)).await;
            }
        });

        Ok(())
    }

    async fn teardown(&self, _ctx: RuntimeContext) {
        self.shutdown.notify_waiters();
        self.shared.connected.store(false, Ordering::Relaxed);
        *self.shared.outbound.lock() = None;
    }

    fn import_config(&self, config: RuntimeConfig) -> EngineResult<()> {
        if *self.base.state.read() == RuntimeState::Running && config.target != self.base.config.read().target {
            return Err(EngineError::ChangeWhileRunning { field: "target" });
        }
        *self.base.config.write() = config;
        Ok(())
    }

    async fn inject_message(&self, message: String) {
        self.send(message.as_bytes());
    }
}

/// The client's own connection id, as seen by `on_connect`/`on_disconnect`/
/// `on_message`: there's only ever one outbound connection at a time, so a
/// fixed id is enough to identify it to a hook.
const CLIENT_CONN_ID: sl_core::hook::ConnId = 0;

/// Run one connection attempt to completion (until EOF, error, or shutdown).
/// Returns whether the connection was established at all, so the caller can
/// decide whether to reset the backoff counter.
async fn run_connection(target: &str, udp: bool, shared: &Arc<Shared>, shutdown: &Notify, hooks: &HookTable) -> bool {
    if udp {
        let Ok(socket) = UdpSocket::bind("0.0.0.0:0").await else { return false };
        if socket.connect(target).await.is_err() {
            return false;
        }
        let (tx, mut rx) = outbound::channel(outbound::OUTBOUND_QUEUE_CAP);
        *shared.outbound.lock() = Some(tx);
        shared.connected.store(true, Ordering::Relaxed);
        if let Some(hook) = &hooks.on_connect {
            hook.call(CLIENT_CONN_ID);
        }
        let mut buf = vec![0u8; crate::reactor::BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                received = socket.recv(&mut buf) => {
                    match received {
                        Ok(n) => {
                            if let Some(hook) = &hooks.on_message {
                                hook.call(String::from_utf8_lossy(&buf[..n]).into_owned());
                            }
                        }
                        Err(_) => break,
                    }
                }
                Some(out) = rx.recv() => {
                    if socket.send(&out).await.is_err() {
                        break;
                    }
                }
            }
        }
        shared.connected.store(false, Ordering::Relaxed);
        if let Some(hook) = &hooks.on_disconnect {
            hook.call(CLIENT_CONN_ID);
        }
        return true;
    }

    let Ok(mut stream) = TcpStream::connect(target).await else { return false };
    info!(target, "client runtime connected");
    let (tx, mut rx) = outbound::channel(outbound::OUTBOUND_QUEUE_CAP);
    *shared.outbound.lock() = Some(tx);
    shared.connected.store(true, Ordering::Relaxed);
    if let Some(hook) = &hooks.on_connect {
        hook.call(CLIENT_CONN_ID);
    }

    let mut buf = bytes::BytesMut::with_capacity(crate::reactor::BUFFER_SIZE);
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            result = stream.read_buf(&mut buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        while let Some(nl) = buf.iter().position(|&b| b == b'\n') {
                            let line = buf[..nl].strip_suffix(b"\r").unwrap_or(&buf[..nl]).to_vec();
                            let _ = buf.split_to(nl + 1);
                            if let Some(hook) = &hooks.on_message {
                                hook.call(String::from_utf8_lossy(&line).into_owned());
                            }
                        }
                    }
                }
            }
            Some(out) = rx.recv() => {
                if stream.write_all(&out).await.is_err() {
                    break;
                }
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    if let Some(hook) = &hooks.on_disconnect {
        hook.call(CLIENT_CONN_ID);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    #[test]
    fn new_client_runtime_starts_disconnected() {
        let mut config = RuntimeConfig::new("c", RuntimeKind::Client);
        config.target = Some("127.0.0.1:1".into());
        let runtime = ClientRuntime::new(config);
        assert!(!runtime.is_connected());
        assert_eq!(runtime.state(), RuntimeState::Created);
    }

    #[test]
    fn send_without_connection_fails() {
        let mut config = RuntimeConfig::new("c", RuntimeKind::Client);
        config.target = Some("127.0.0.1:1".into());
        let runtime = ClientRuntime::new(config);
        assert!(!runtime.send(b"hi"));
    }
}
