// SPDX-License-Identifier: MIT

//! Token bucket rate limiting.
//!
//! Each processed application message refills the bucket proportional to
//! elapsed wall time (capped at the configured rate), then consumes one
//! token. An empty bucket means the message is discarded without being
//! counted. Used both per-connection and globally per runtime.

use crate::clock::Clock;

/// A token bucket with rate `messages_per_second` and max capacity equal to
/// that same rate (one second's worth of burst).
pub struct TokenBucket<C: Clock> {
    rate: f64,
    tokens: f64,
    last_refill: Option<std::time::Instant>,
    clock: C,
}

impl<C: Clock> TokenBucket<C> {
    /// `rate` is messages/second; 0 means unlimited (bucket never denies).
    pub fn new(rate: f64, clock: C) -> Self {
        Self {
            rate,
            tokens: rate,
            last_refill: None,
            clock,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Refill proportional to elapsed time, then try to consume one token.
    /// Returns `true` if the message is allowed.
    pub fn try_consume(&mut self) -> bool {
        if self.rate <= 0.0 {
            return true;
        }

        let now = self.clock.now();
        if let Some(last) = self.last_refill {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        }
        self.last_refill = Some(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn unlimited_rate_always_allows() {
        let mut bucket = TokenBucket::new(0.0, FakeClock::new());
        for _ in 0..100 {
            assert!(bucket.try_consume());
        }
    }

    #[test]
    fn bucket_depletes_then_refills_over_time() {
        let clock = FakeClock::new();
        let mut bucket = TokenBucket::new(2.0, clock.clone());

        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume(), "bucket should be empty after burst");

        clock.advance(std::time::Duration::from_millis(600));
        assert!(bucket.try_consume(), "should have refilled ~1.2 tokens");
        assert!(!bucket.try_consume());
    }

    #[test]
    fn refill_is_capped_at_rate() {
        let clock = FakeClock::new();
        let mut bucket = TokenBucket::new(1.0, clock.clone());
        assert!(bucket.try_consume());
        clock.advance(std::time::Duration::from_secs(100));
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
    }
}
