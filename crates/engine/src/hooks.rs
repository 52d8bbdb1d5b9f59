// SPDX-License-Identifier: MIT

//! Hooks whose payloads are wire-protocol types, kept out of `sl_core::hook`
//! so that crate doesn't need to depend on HTTP/WebSocket types. Uses the
//! same [`sl_core::Hook`] wrapper.

use std::collections::HashMap;

use sl_core::hook::{ConnId, Hook};

use crate::http::{Request, Response};

/// Extra hooks for the server runtime beyond `sl_core::HookTable`'s
/// plain-value set.
#[derive(Default, Clone)]
pub struct ServerExtraHooks {
    /// `None` means "no dynamic HTTP handler registered"; the caller falls
    /// through to static file serving / 404.
    pub on_http_request: Option<Hook<Request, Response>>,
    pub on_websocket: Option<Hook<(ConnId, HashMap<String, String>), ()>>,
}

impl std::fmt::Debug for ServerExtraHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerExtraHooks").finish_non_exhaustive()
    }
}

/// Backend-selection hook for a proxy runtime in `lua`/native strategy
/// mode. Returns `None` to fall back to round-robin when the index is
/// invalid or the hook isn't set.
#[derive(Default, Clone)]
pub struct ProxyHooks {
    pub on_route_http: Option<Hook<(String, String), Option<usize>>>,
    pub on_route_tcp: Option<Hook<(), Option<usize>>>,
}

impl std::fmt::Debug for ProxyHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHooks").finish_non_exhaustive()
    }
}
