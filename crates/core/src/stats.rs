// SPDX-License-Identifier: MIT

//! Per-runtime counters, updated atomically from the I/O hot path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the I/O hot path and read by the
/// control-plane `stats` command.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_in(&self, bytes: u64) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_out(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = RuntimeStats::new();
        stats.record_connection();
        stats.record_connection();
        stats.record_message_in(128);
        stats.record_bytes_out(64);

        assert_eq!(stats.total_connections(), 2);
        assert_eq!(stats.total_messages(), 1);
        assert_eq!(stats.bytes_in(), 128);
        assert_eq!(stats.bytes_out(), 64);
    }
}
