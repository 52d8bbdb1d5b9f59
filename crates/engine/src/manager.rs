// SPDX-License-Identifier: MIT

//! The runtime registry and the one piece of cross-runtime coordination
//! every kind needs without holding a pointer to anyone else: send a
//! message to a named runtime, or publish a cache event to whoever
//! registered interest in it.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use sl_core::model::{ChildPolicy, RuntimeConfig, RuntimeKind};
use sl_storage::PersistenceStore;

use crate::context::{ManagerHandle, RuntimeContext};
use crate::error::{EngineError, EngineResult};
use crate::reactor::BufferPool;
use crate::runtime::Runtime;

/// Requests a runtime's connection-handling tasks make of the manager
/// without holding a back-reference to it.
pub enum ManagerCommand {
    /// Deliver `message` to the named runtime as if received on a
    /// connection (control-plane `send`, master-mode forwarding, proxy
    /// route-to-sibling).
    SendTo { target: String, message: String },
    /// A cache runtime publishing on `channel`; fan out to every runtime
    /// that called [`RuntimeManager::subscribe_interest`] for that cache.
    CachePublish { cache_name: String, channel: String, message: String },
    /// A server runtime forwarding a `"cache "`-prefixed line to a linked
    /// cache runtime, expecting the reply back.
    ExecuteCache { cache_name: String, line: Vec<u8>, reply: tokio::sync::oneshot::Sender<Option<Vec<u8>>> },
    /// A proxy runtime resolving a bare backend name to a sibling
    /// runtime's listen port at `setup`.
    ResolvePort { name: String, reply: tokio::sync::oneshot::Sender<Option<u16>> },
    /// `route_client`: forward a message received on a routed connection to
    /// the server runtime it's routed to.
    RouteMessage { target: String, origin: String, conn_id: u64, message: String },
    /// The origin side of a routed connection closed; tear down the target
    /// runtime's hook state for it.
    RoutedDisconnect { target: String, conn_id: u64 },
    /// `send_to_client`/`owner_send`: deliver raw bytes to one specific
    /// connection already held open by the named runtime.
    DeliverToConnection { target: String, conn_id: u64, message: Vec<u8>, reply: tokio::sync::oneshot::Sender<bool> },
}

struct Entry {
    runtime: Arc<dyn Runtime>,
    owner: Option<String>,
    child_policy: ChildPolicy,
}

/// Owns every live runtime, keyed by name. `Arc`-shared so control-plane
/// handlers and the command-processing task below can both hold it.
pub struct RuntimeManager {
    registry: RwLock<IndexMap<String, Entry>>,
    interest: RwLock<HashMap<String, Vec<String>>>,
    store: PersistenceStore,
    buffers: Arc<BufferPool>,
    cmd_tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl RuntimeManager {
    /// Build a manager and spawn the task that drains `ManagerCommand`s
    /// sent by runtimes back into their siblings.
    pub fn new(store: PersistenceStore, buffers: Arc<BufferPool>) -> Arc<Self> {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            registry: RwLock::new(IndexMap::new()),
            interest: RwLock::new(HashMap::new()),
            store,
            buffers,
            cmd_tx,
        });

        let worker = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                worker.handle_command(command).await;
            }
        });

        manager
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle::new(self.cmd_tx.clone())
    }

    fn context(&self) -> RuntimeContext {
        RuntimeContext::new(self.handle(), Arc::clone(&self.buffers))
    }

    async fn handle_command(&self, command: ManagerCommand) {
        match command {
            ManagerCommand::SendTo { target, message } => {
                if let Some(runtime) = self.get(&target) {
                    runtime.inject_message(message).await;
                } else {
                    warn!(target, "send to unknown runtime");
                }
            }
            ManagerCommand::CachePublish { cache_name, channel, message } => {
                let interested = self.interest.read().get(&cache_name).cloned().unwrap_or_default();
                for name in interested {
                    if let Some(runtime) = self.get(&name) {
                        runtime.inject_message(format!("{channel} {message}")).await;
                    }
                }
            }
            ManagerCommand::ExecuteCache { cache_name, line, reply } => {
                let result = match self.get(&cache_name) {
                    Some(runtime) => runtime.execute_cache_command(&line).await,
                    None => None,
                };
                let _ = reply.send(result);
            }
            ManagerCommand::ResolvePort { name, reply } => {
                let port = self.get(&name).map(|r| r.config().port);
                let _ = reply.send(port);
            }
            ManagerCommand::RouteMessage { target, origin, conn_id, message } => {
                if let Some(runtime) = self.get(&target) {
                    runtime.receive_routed_message(origin, conn_id, message).await;
                } else {
                    warn!(target, "route to unknown runtime");
                }
            }
            ManagerCommand::RoutedDisconnect { target, conn_id } => {
                if let Some(runtime) = self.get(&target) {
                    runtime.routed_disconnect(conn_id).await;
                }
            }
            ManagerCommand::DeliverToConnection { target, conn_id, message, reply } => {
                let ok = match self.get(&target) {
                    Some(runtime) => runtime.deliver_to_connection(conn_id, message).await,
                    None => false,
                };
                let _ = reply.send(ok);
            }
        }
    }

    /// Register `runtime_name` as interested in publishes on `cache_name`.
    pub fn subscribe_interest(&self, cache_name: &str, runtime_name: &str) {
        self.interest
            .write()
            .entry(cache_name.to_string())
            .or_default()
            .push(runtime_name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Runtime>> {
        self.registry.read().get(name).map(|e| Arc::clone(&e.runtime))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.registry.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    /// All runtimes whose config names `owner` as their parent.
    pub fn children_of(&self, owner: &str) -> Vec<String> {
        self.registry
            .read()
            .iter()
            .filter(|(_, e)| e.owner.as_deref() == Some(owner))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// All runtimes sharing `group`.
    pub fn by_group(&self, group: &str) -> Vec<String> {
        self.registry
            .read()
            .iter()
            .filter(|(_, e)| e.runtime.config().group.as_deref() == Some(group))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn register(&self, runtime: Arc<dyn Runtime>, owner: Option<String>, child_policy: ChildPolicy) {
        let name = runtime.name();
        self.registry.write().insert(name, Entry { runtime, owner, child_policy });
    }

    /// Register a newly created runtime and persist its config, without
    /// starting it (control-plane `create` without `-s`).
    pub fn create(&self, runtime: Arc<dyn Runtime>, owner: Option<String>, child_policy: ChildPolicy) {
        let config = runtime.config();
        if self.store.save(&config).is_err() && !config.test_mode {
            warn!(name = %config.name, "failed to persist new runtime config");
        }
        self.register(runtime, owner, child_policy);
    }

    pub async fn create_and_start(&self, runtime: Arc<dyn Runtime>, owner: Option<String>, child_policy: ChildPolicy) -> EngineResult<()> {
        self.create(Arc::clone(&runtime), owner, child_policy);
        runtime.start(self.context()).await
    }

    /// Rename a stopped runtime in the registry; rejected if `new` already
    /// exists. Re-persists under the new filename.
    pub fn rename(&self, old: &str, new: &str) -> EngineResult<()> {
        if self.exists(new) {
            return Err(EngineError::Setup(format!("already exists: {new}")));
        }
        let mut registry = self.registry.write();
        let entry = registry.shift_remove(old).ok_or(EngineError::NotRunning)?;
        let _ = self.store.remove(old);
        let _ = self.store.save(&entry.runtime.config());
        registry.insert(new.to_string(), entry);
        Ok(())
    }

    /// Stop every running runtime, best-effort, used on daemon shutdown.
    pub async fn stop_all(&self) {
        for name in self.names() {
            if self.get(&name).map(|r| r.state()) == Some(sl_core::model::RuntimeState::Running) {
                let _ = self.stop(&name).await;
            }
        }
    }

    pub async fn start(&self, name: &str) -> EngineResult<()> {
        let runtime = self.get(name).ok_or(EngineError::NotRunning)?;
        runtime.start(self.context()).await?;
        let _ = self.store.set_was_running(name, true);
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> EngineResult<()> {
        let runtime = self.get(name).ok_or(EngineError::NotRunning)?;
        runtime.stop(self.context()).await?;
        let _ = self.store.set_was_running(name, false);
        self.cascade_stop_children(name).await;
        Ok(())
    }

    /// Stop (and, per each child's [`ChildPolicy`], remove) every runtime
    /// owned by `owner`.
    async fn cascade_stop_children(&self, owner: &str) {
        for child_name in self.children_of(owner) {
            if self.get(&child_name).map(|r| r.state()) == Some(sl_core::model::RuntimeState::Running) {
                let _ = self.stop(&child_name).await;
            }
            let remove = self
                .registry
                .read()
                .get(&child_name)
                .map(|e| e.child_policy == ChildPolicy::Remove)
                .unwrap_or(false);
            if remove {
                let _ = self.remove(&child_name).await;
            }
        }
    }

    /// Stop (if running) and drop a runtime from the registry, deleting its
    /// persisted config.
    pub async fn remove(&self, name: &str) -> EngineResult<()> {
        if let Some(runtime) = self.get(name) {
            if runtime.state() == sl_core::model::RuntimeState::Running {
                runtime.stop(self.context()).await?;
            }
        }
        self.registry.write().shift_remove(name);
        let _ = self.store.remove(name);
        Ok(())
    }

    pub fn import_config(&self, name: &str, config: RuntimeConfig) -> EngineResult<()> {
        let runtime = self.get(name).ok_or(EngineError::NotRunning)?;
        runtime.import_config(config)
    }

    pub fn kind_of(&self, name: &str) -> Option<RuntimeKind> {
        self.get(name).map(|r| r.kind())
    }

    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }
}
