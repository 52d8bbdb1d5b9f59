// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sl-core: shared data model for the Socketley daemon.
//!
//! This crate has no I/O of its own — it defines the runtime data model
//! (kind, state, config), the hook dispatch table, rate limiting,
//! generational arenas for tagging in-flight I/O ops, and a clock
//! abstraction for testable timing. Every other crate in the workspace
//! depends on this one.

pub mod arena;
pub mod clock;
pub mod glob;
pub mod hook;
pub mod id;
pub mod macros;
pub mod model;
pub mod rate_limit;
pub mod stats;
pub mod time_fmt;
pub mod timer;

pub use arena::{Arena, ArenaIndex};
pub use clock::{Clock, FakeClock, SystemClock};
pub use hook::{Hook, HookTable};
pub use id::short_hex;
pub use model::{
    CacheConfig, CacheEviction, CacheMode, ChildPolicy, ExternalKind, HealthCheckKind,
    ProxyConfig, ProxyProtocol, ProxyStrategy, ReplicationRole, RuntimeConfig, RuntimeKind,
    RuntimeState, ServerMode, TlsConfig,
};
pub use rate_limit::TokenBucket;
pub use stats::RuntimeStats;
pub use time_fmt::format_elapsed;
pub use timer::TimerKind;
