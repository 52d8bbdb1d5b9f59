// SPDX-License-Identifier: MIT

//! The cache runtime's in-memory data engine: a typed key-value store with
//! strings, lists, sets, and hashes, TTL expiry, LRU/random eviction under a
//! memory budget, pub/sub fan-out bookkeeping, snapshot persistence, and
//! single-leader replication.
//!
//! This crate has no knowledge of sockets or connections — it is the pure
//! data-structure half of the cache runtime. The engine crate owns I/O and
//! wires this store to `sl_wire`'s RESP2/plaintext codecs.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod error;
mod mode;
mod persistence;
mod pubsub;
mod replication;
mod store;
mod value;

pub use error::CacheError;
pub use mode::{EvictionPolicy, Mode};
pub use persistence::{load as load_snapshot, save as save_snapshot, SnapshotError};
pub use pubsub::{ConnId as PubSubConnId, PubSub};
pub use replication::{
    ConnId as ReplicationConnId, Followers, MutatingCommand, ReplicationDecodeError, full_dump,
};
pub use store::Store;
pub use value::{Value, ValueKind};
