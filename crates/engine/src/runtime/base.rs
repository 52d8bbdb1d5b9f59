// SPDX-License-Identifier: MIT

//! Shared state every runtime kind embeds by composition (not inheritance —
//! Rust has no base classes): identity, lifecycle state,
//! counters, hooks, and the per-connection/global rate limiters. The four
//! kind-specific structs each hold one of these and implement
//! [`super::Runtime::base`] to return it.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sl_core::clock::SystemClock;
use sl_core::hook::HookTable;
use sl_core::model::{RuntimeConfig, RuntimeKind, RuntimeState};
use sl_core::rate_limit::TokenBucket;
use sl_core::stats::RuntimeStats;
use tokio::sync::mpsc;

use crate::hooks::{ProxyHooks, ServerExtraHooks};

/// Sentinel written to every attached interactive control-socket to signal
/// end-of-session when the runtime stops.
pub const INTERACTIVE_EOS: &[u8] = &[0u8];

/// Shared handle to a runtime's set of attached interactive control-plane
/// sessions, clonable into a kind's own connection-handling state so it can
/// mirror outbound messages without a back-reference to `RuntimeBase`.
pub type InteractiveSessions = Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>;

/// Push `data` to every sender in `sessions`, pruning closed ones.
pub fn mirror_interactive(sessions: &InteractiveSessions, data: &[u8]) {
    let mut senders = sessions.lock();
    senders.retain(|tx| tx.send(data.to_vec()).is_ok());
}

pub struct RuntimeBase {
    pub id: String,
    pub kind: RuntimeKind,
    pub config: RwLock<RuntimeConfig>,
    pub state: RwLock<RuntimeState>,
    pub stats: std::sync::Arc<RuntimeStats>,
    pub hooks: HookTable,
    pub server_hooks: ServerExtraHooks,
    pub proxy_hooks: ProxyHooks,
    /// Global (whole-runtime) rate limiter; `None` when `global_rate_limit`
    /// is 0 (unlimited).
    pub global_limiter: Mutex<Option<TokenBucket<SystemClock>>>,
    /// Control connections that promoted themselves to interactive mode via
    /// `start -i`. Every outbound message the runtime produces is mirrored
    /// to each of these; closed receivers are pruned lazily on next send.
    interactive: InteractiveSessions,
}

impl RuntimeBase {
    pub fn new(config: RuntimeConfig) -> Self {
        let id = config.id.clone();
        let kind = config.kind;
        let global_limiter = if config.global_rate_limit > 0.0 {
            Some(TokenBucket::new(config.global_rate_limit, SystemClock))
        } else {
            None
        };
        Self {
            id,
            kind,
            config: RwLock::new(config),
            state: RwLock::new(RuntimeState::Created),
            stats: std::sync::Arc::new(RuntimeStats::new()),
            hooks: HookTable::new(),
            server_hooks: ServerExtraHooks::default(),
            proxy_hooks: ProxyHooks::default(),
            global_limiter: Mutex::new(global_limiter),
            interactive: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Promote a control connection to an interactive session: it receives
    /// every subsequent outbound message from this runtime until the
    /// runtime stops or the receiver is dropped.
    pub fn attach_interactive(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.interactive.lock().push(tx);
        rx
    }

    /// A clonable handle a runtime kind can thread into its own
    /// connection-handling state to mirror outbound messages directly,
    /// without routing every send back through `RuntimeBase`.
    pub fn interactive_sessions(&self) -> InteractiveSessions {
        Arc::clone(&self.interactive)
    }

    /// Mirror an outbound message to every attached interactive session.
    pub fn interactive_broadcast(&self, data: &[u8]) {
        mirror_interactive(&self.interactive, data);
    }

    /// Signal end-of-session to every attached interactive control-socket
    /// and drop them. Called when the runtime stops.
    pub fn close_interactive_sessions(&self) {
        let mut senders = self.interactive.lock();
        for tx in senders.drain(..) {
            let _ = tx.send(INTERACTIVE_EOS.to_vec());
        }
    }

    /// Apply the global rate limiter; `true` means "allowed". Always `true`
    /// when unlimited.
    pub fn allow_globally(&self) -> bool {
        match self.global_limiter.lock().as_mut() {
            Some(bucket) => bucket.try_consume(),
            None => true,
        }
    }

    /// A fresh per-connection limiter for the runtime's configured
    /// `rate_limit`, or `None` when unlimited.
    pub fn new_connection_limiter(&self) -> Option<TokenBucket<SystemClock>> {
        let rate = self.config.read().rate_limit;
        if rate > 0.0 {
            Some(TokenBucket::new(rate, SystemClock))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeConfig;

    #[test]
    fn starts_in_created_state() {
        let base = RuntimeBase::new(RuntimeConfig::new("t", RuntimeKind::Server));
        assert_eq!(*base.state.read(), RuntimeState::Created);
    }

    #[test]
    fn unlimited_global_rate_always_allows() {
        let base = RuntimeBase::new(RuntimeConfig::new("t", RuntimeKind::Server));
        for _ in 0..10 {
            assert!(base.allow_globally());
        }
    }
}
