// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sl-engine: the event loop, runtime lifecycle, runtime manager, external
//! runtime launcher, and the four runtime kinds (server, client, proxy,
//! cache) that turn a [`sl_core::model::RuntimeConfig`] into a live,
//! connection-handling task.

pub mod context;
pub mod error;
pub mod http;
pub mod hooks;
pub mod launcher;
pub mod manager;
pub mod outbound;
pub mod protocol;
pub mod reactor;
pub mod runtime;

pub use context::{ManagerHandle, RuntimeContext};
pub use error::{EngineError, EngineResult};
pub use manager::{ManagerCommand, RuntimeManager};
pub use reactor::{BufferPool, ReactorFeatures};
pub use runtime::cache::CacheRuntime;
pub use runtime::client::ClientRuntime;
pub use runtime::proxy::ProxyRuntime;
pub use runtime::server::ServerRuntime;
pub use runtime::base::INTERACTIVE_EOS;
pub use runtime::{Runtime, RuntimeBase};

use std::sync::Arc;

use sl_core::model::{RuntimeConfig, RuntimeKind};

/// Build the right runtime kind for a freshly loaded or created config.
pub fn build_runtime(config: RuntimeConfig) -> Arc<dyn Runtime> {
    match config.kind {
        RuntimeKind::Server => Arc::new(ServerRuntime::new(config)),
        RuntimeKind::Client => Arc::new(ClientRuntime::new(config)),
        RuntimeKind::Proxy => Arc::new(ProxyRuntime::new(config)),
        RuntimeKind::Cache => Arc::new(CacheRuntime::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::model::RuntimeKind;

    #[test]
    fn build_runtime_picks_the_matching_kind() {
        let config = RuntimeConfig::new("s", RuntimeKind::Server);
        let runtime = build_runtime(config);
        assert_eq!(runtime.kind(), RuntimeKind::Server);
    }
}
