// SPDX-License-Identifier: MIT

//! Channel subscription bookkeeping for `subscribe`/`unsubscribe`/`publish`.
//!
//! The cache store itself only tracks which connection ids are subscribed to
//! which channels; actually writing the published message to a socket is the
//! caller's job (the engine owns connection I/O, not the cache).

use std::collections::{HashMap, HashSet};

/// Opaque connection identifier, matching `sl_core::hook::ConnId`.
pub type ConnId = u64;

#[derive(Debug, Default)]
pub struct PubSub {
    channels: HashMap<String, HashSet<ConnId>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, channel: &str, conn: ConnId) {
        self.channels.entry(channel.to_string()).or_default().insert(conn);
    }

    /// Returns `true` if the connection was subscribed to that channel.
    pub fn unsubscribe(&mut self, channel: &str, conn: ConnId) -> bool {
        match self.channels.get_mut(channel) {
            Some(subs) => {
                let removed = subs.remove(&conn);
                if subs.is_empty() {
                    self.channels.remove(channel);
                }
                removed
            }
            None => false,
        }
    }

    /// Drop a connection from every channel it was subscribed to, e.g. on
    /// disconnect. Returns the number of channels it was removed from.
    pub fn unsubscribe_all(&mut self, conn: ConnId) -> usize {
        let mut count = 0;
        self.channels.retain(|_, subs| {
            if subs.remove(&conn) {
                count += 1;
            }
            !subs.is_empty()
        });
        count
    }

    /// Returns the set of connections that should receive this message. The
    /// count is the fan-out; the caller writes to each.
    pub fn subscribers(&self, channel: &str) -> Vec<ConnId> {
        self.channels.get(channel).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(HashSet::len).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_publish_reaches_subscribers() {
        let mut ps = PubSub::new();
        ps.subscribe("news", 1);
        ps.subscribe("news", 2);
        let subs = ps.subscribers("news");
        assert_eq!(subs.len(), 2);
        assert!(subs.contains(&1) && subs.contains(&2));
    }

    #[test]
    fn publish_to_channel_with_no_subscribers_is_empty() {
        let ps = PubSub::new();
        assert_eq!(ps.subscribers("ghost"), Vec::<ConnId>::new());
    }

    #[test]
    fn unsubscribe_removes_one_connection_only() {
        let mut ps = PubSub::new();
        ps.subscribe("news", 1);
        ps.subscribe("news", 2);
        assert!(ps.unsubscribe("news", 1));
        assert_eq!(ps.subscribers("news"), vec![2]);
    }

    #[test]
    fn unsubscribe_unknown_channel_returns_false() {
        let mut ps = PubSub::new();
        assert!(!ps.unsubscribe("ghost", 1));
    }

    #[test]
    fn empty_channel_is_pruned_after_last_unsubscribe() {
        let mut ps = PubSub::new();
        ps.subscribe("news", 1);
        ps.unsubscribe("news", 1);
        assert_eq!(ps.channel_count(), 0);
    }

    #[test]
    fn disconnect_clears_every_subscription() {
        let mut ps = PubSub::new();
        ps.subscribe("a", 1);
        ps.subscribe("b", 1);
        ps.subscribe("b", 2);
        assert_eq!(ps.unsubscribe_all(1), 2);
        assert_eq!(ps.subscribers("a"), Vec::<ConnId>::new());
        assert_eq!(ps.subscribers("b"), vec![2]);
    }
}
