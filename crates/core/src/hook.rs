// SPDX-License-Identifier: MIT

//! Hook dispatch.
//!
//! Every lifecycle/data event has one native-callback slot. Embedded
//! scripting is out of scope here, so [`Hook`] keeps only that native slot:
//! a boxed, clonable, thread-safe closure.
//!
//! [`HookTable`] covers the hooks whose argument/return types are plain
//! values. Hooks whose payloads are wire-protocol types (`on_http_request`,
//! `on_websocket`) are declared next to those types in `sl-engine`, using
//! the same [`Hook`] wrapper.

use std::fmt;
use std::sync::Arc;

/// A clonable, `Send + Sync` callback slot.
pub struct Hook<Args, Ret> {
    f: Arc<dyn Fn(Args) -> Ret + Send + Sync>,
}

impl<Args, Ret> Hook<Args, Ret> {
    pub fn new(f: impl Fn(Args) -> Ret + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    pub fn call(&self, args: Args) -> Ret {
        (self.f)(args)
    }
}

impl<Args, Ret> Clone for Hook<Args, Ret> {
    fn clone(&self) -> Self {
        Self { f: Arc::clone(&self.f) }
    }
}

impl<Args, Ret> fmt::Debug for Hook<Args, Ret> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}

/// Connection id as seen by hook callbacks — stands in for the original's
/// raw fd, since the reactor never hands out raw file descriptors.
pub type ConnId = u64;

/// The subset of runtime hooks with plain-value signatures. One instance per
/// runtime; `None` means "not registered", in which case dispatch is a no-op
/// (for `()` hooks) or falls through to a default (for hooks with a return
/// value, documented per field).
#[derive(Default, Clone)]
pub struct HookTable {
    pub on_start: Option<Hook<(), ()>>,
    pub on_stop: Option<Hook<(), ()>>,
    pub on_connect: Option<Hook<ConnId, ()>>,
    /// Default (no hook registered) is "allow".
    pub on_auth: Option<Hook<ConnId, bool>>,
    pub on_message: Option<Hook<String, ()>>,
    pub on_client_message: Option<Hook<(ConnId, String), ()>>,
    pub on_send: Option<Hook<String, ()>>,
    pub on_disconnect: Option<Hook<ConnId, ()>>,
    pub on_tick: Option<Hook<f64, ()>>,
    /// Default (no hook registered) is "deny".
    pub on_master_auth: Option<Hook<(ConnId, String), bool>>,
    pub on_upstream: Option<Hook<(ConnId, Vec<u8>), ()>>,
    pub on_upstream_connect: Option<Hook<ConnId, ()>>,
    pub on_upstream_disconnect: Option<Hook<ConnId, ()>>,
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTable").finish_non_exhaustive()
    }
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_auth(&self, conn: ConnId) -> bool {
        match &self.on_auth {
            Some(hook) => hook.call(conn),
            None => true,
        }
    }

    pub fn dispatch_master_auth(&self, conn: ConnId, password: String) -> bool {
        match &self.on_master_auth {
            Some(hook) => hook.call((conn, password)),
            None => false,
        }
    }
}
