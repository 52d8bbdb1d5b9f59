// SPDX-License-Identifier: MIT

//! What a runtime is handed at `setup`/`teardown` and while processing a
//! message. Raw pointers back to the manager or reactor on every runtime
//! instance make destruction order a minefield once two runtimes reference
//! each other (owner/child, client routing), so a runtime never holds a
//! pointer back to the manager or the reactor — it's handed a
//! [`RuntimeContext`] at call sites that need one, built from an
//! `mpsc::Sender<ManagerCommand>` and a shared [`BufferPool`]. Dropping a
//! runtime drops only its own state; the manager keeps working.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::manager::ManagerCommand;
use crate::reactor::BufferPool;

/// A non-owning handle to the manager, safe to clone into every connection
/// task a runtime spawns. Sending fails silently (manager gone, usually
/// during shutdown) rather than erroring the caller.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl ManagerHandle {
    pub fn new(tx: mpsc::UnboundedSender<ManagerCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: ManagerCommand) {
        let _ = self.tx.send(command);
    }

    /// Forward `line` to the named cache runtime and await its reply.
    /// `None` if the manager is gone, the runtime doesn't exist, or it
    /// isn't a cache.
    pub async fn execute_cache(&self, cache_name: String, line: Vec<u8>) -> Option<Vec<u8>> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.send(ManagerCommand::ExecuteCache { cache_name, line, reply: reply_tx });
        reply_rx.await.ok().flatten()
    }

    /// Resolve a sibling runtime's listen port by name: proxy backends
    /// that aren't a literal `host:port` name another local
    /// runtime, resolved to `127.0.0.1:<that runtime's port>`.
    pub async fn resolve_port(&self, name: String) -> Option<u16> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.send(ManagerCommand::ResolvePort { name, reply: reply_tx });
        reply_rx.await.ok().flatten()
    }

    /// `route_client`: hand a message from a routed connection to the
    /// runtime it's routed to. Fire-and-forget; the reply path (if any)
    /// comes back through `send_to_client`/`deliver_to_connection`.
    pub fn route_message(&self, target: String, origin: String, conn_id: u64, message: String) {
        self.send(ManagerCommand::RouteMessage { target, origin, conn_id, message });
    }

    /// Notify a routed-to runtime that the origin connection closed.
    pub fn routed_disconnect(&self, target: String, conn_id: u64) {
        self.send(ManagerCommand::RoutedDisconnect { target, conn_id });
    }

    /// `send_to_client`/`owner_send`: deliver bytes to one specific
    /// connection on the named runtime. Returns whether it was accepted.
    pub async fn deliver_to_connection(&self, target: String, conn_id: u64, message: Vec<u8>) -> bool {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.send(ManagerCommand::DeliverToConnection { target, conn_id, message, reply: reply_tx });
        reply_rx.await.unwrap_or(false)
    }
}

/// Threaded through `setup`, `teardown`, and connection-handling tasks.
/// Cloning is cheap (an `Arc` and an `mpsc::Sender` clone).
#[derive(Clone)]
pub struct RuntimeContext {
    pub manager: ManagerHandle,
    pub buffers: Arc<BufferPool>,
}

impl RuntimeContext {
    pub fn new(manager: ManagerHandle, buffers: Arc<BufferPool>) -> Self {
        Self { manager, buffers }
    }
}
