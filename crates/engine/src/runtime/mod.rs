// SPDX-License-Identifier: MIT

//! Runtime lifecycle & the shared concerns every kind inherits.
//! [`RuntimeBase`] holds state every runtime needs (id, name, kind,
//! lifecycle state, stats, hooks, rate limiters); [`Runtime`] is the trait
//! the four kind-specific implementations (`server`, `client`, `proxy`,
//! `cache`) satisfy so the manager can hold them as trait objects without
//! knowing which kind it's driving. `start`/`stop` are default methods on
//! the trait that do the shared state-transition bookkeeping and then
//! dispatch to the kind's `setup`/`teardown`; a kind only has to provide
//! `base()` and those two hooks.

pub mod base;
pub mod cache;
pub mod client;
pub mod proxy;
pub mod server;

use async_trait::async_trait;
use sl_core::model::{RuntimeConfig, RuntimeKind, RuntimeState};
use sl_core::stats::RuntimeStats;
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::error::{EngineError, EngineResult};

pub use base::RuntimeBase;

/// What every runtime kind must implement so the manager can drive it
/// generically.
#[async_trait]
pub trait Runtime: Send + Sync {
    fn base(&self) -> &RuntimeBase;

    /// Subclass-specific bring-up: bind sockets, connect, spawn background
    /// tasks. Failure transitions the runtime to `Failed`.
    async fn setup(&self, ctx: RuntimeContext) -> EngineResult<()>;

    /// Subclass-specific tear-down: stop background tasks, close sockets.
    async fn teardown(&self, ctx: RuntimeContext);

    /// Apply a persisted/edited config, subject to the "can't change while
    /// running" gate for fields that require a re-bind.
    fn import_config(&self, config: RuntimeConfig) -> EngineResult<()>;

    /// Push a message into the runtime as if it had been received on a
    /// connection — used by the control-plane `send` verb and by
    /// cross-runtime routing/pubsub.
    async fn inject_message(&self, message: String);

    /// Execute one line against this runtime as a cache command and return
    /// its reply, for a server's `"cache "`-prefixed forwarding.
    /// `None` for every kind but cache.
    async fn execute_cache_command(&self, _line: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Deliver a message forwarded from a connection routed to this runtime
    /// by another server (`route_client`). `origin`/`conn_id` identify the
    /// connection back on the runtime it came from, for any reply sent via
    /// `send_to_client`. Default no-op for runtimes that aren't a server.
    async fn receive_routed_message(&self, _origin: String, _conn_id: u64, _message: String) {}

    /// A routed connection registered with `receive_routed_message` just
    /// disconnected on its origin runtime; tear down any hook state kept for
    /// it (fires `on_disconnect` for servers).
    async fn routed_disconnect(&self, _conn_id: u64) {}

    /// Deliver raw bytes to one specific connection already held open by
    /// this runtime, bypassing hooks and broadcast — the target side of
    /// `send_to_client`/`owner_send`. Returns whether the connection still
    /// exists and accepted the write.
    async fn deliver_to_connection(&self, _conn_id: u64, _message: Vec<u8>) -> bool {
        false
    }

    fn kind(&self) -> RuntimeKind {
        self.base().kind
    }

    fn name(&self) -> String {
        self.base().config.read().name.clone()
    }

    fn id(&self) -> String {
        self.base().id.clone()
    }

    fn state(&self) -> RuntimeState {
        *self.base().state.read()
    }

    fn config(&self) -> RuntimeConfig {
        self.base().config.read().clone()
    }

    fn stats(&self) -> &RuntimeStats {
        &self.base().stats
    }

    /// Start the runtime. Rejected unless
    /// `state` is `Created` or `Stopped`.
    async fn start(&self, ctx: RuntimeContext) -> EngineResult<()> {
        {
            let state = self.base().state.read();
            if !matches!(*state, RuntimeState::Created | RuntimeState::Stopped) {
                return Err(EngineError::NotStartable);
            }
        }
        match self.setup(ctx).await {
            Ok(()) => {
                *self.base().state.write() = RuntimeState::Running;
                info!(runtime = %self.name(), kind = ?self.kind(), "runtime started");
                Ok(())
            }
            Err(err) => {
                *self.base().state.write() = RuntimeState::Failed;
                warn!(runtime = %self.name(), error = %err, "runtime setup failed");
                Err(err)
            }
        }
    }

    /// Stop the runtime. Rejected unless `state` is `Running`.
    async fn stop(&self, ctx: RuntimeContext) -> EngineResult<()> {
        {
            let state = self.base().state.read();
            if *state != RuntimeState::Running {
                return Err(EngineError::NotRunning);
            }
        }
        self.teardown(ctx).await;
        self.base().close_interactive_sessions();
        *self.base().state.write() = RuntimeState::Stopped;
        info!(runtime = %self.name(), kind = ?self.kind(), "runtime stopped");
        Ok(())
    }
}
