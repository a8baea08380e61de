//! Token bucket with reservations.
//!
//! The bucket is tracked as the instant at which every token handed out so
//! far has been paid back by the refill (the "drain time"). A full bucket has
//! its drain time at or before now; each grant pushes it forward by the
//! refill time of the granted tokens. A grant is ready once the drain time
//! lies no more than one full bucket ahead of the clock.
//!
//! Grants that are not ready yet are still committed, so concurrent waiters
//! queue up behind each other instead of all waking at the same instant.
//! Time is passed in by the caller (microseconds on any monotonic origin),
//! which keeps the bucket deterministic under a simulated clock.

use crate::error::{FlowError, FlowResult};

const MICROS_PER_SEC: u128 = 1_000_000;

/// Size and refill rate of a [`TokenBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Largest number of tokens granted at once.
    pub burst: u64,
    /// Tokens refilled per second.
    pub rate: u64,
}

impl TokenBucketConfig {
    /// A bucket of `burst` tokens refilled at `rate` tokens per second.
    #[must_use]
    pub const fn new(burst: u64, rate: u64) -> Self {
        Self { burst, rate }
    }

    /// A bucket refilled at `rate` tokens per second that holds one second
    /// worth of tokens.
    #[must_use]
    pub const fn per_second(rate: u64) -> Self {
        Self::new(rate, rate)
    }
}

/// A token bucket driven by caller-supplied time. Starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    burst: u64,
    rate: u64,
    /// When every granted token will have been refilled.
    drained_at_us: u64,
}

impl TokenBucket {
    /// Creates a full bucket at time `now_us`.
    #[must_use]
    pub const fn new(config: &TokenBucketConfig, now_us: u64) -> Self {
        Self {
            burst: config.burst,
            rate: config.rate,
            drained_at_us: now_us,
        }
    }

    /// Reserves `tokens` and returns the time at which they may be used.
    ///
    /// The reservation is committed even if it is not ready yet; the caller
    /// is expected to wait until the returned time.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the request exceeds the burst or
    /// the bucket never refills.
    pub fn consume_with_wait(&mut self, tokens: u64, now_us: u64) -> FlowResult<u64> {
        if tokens > self.burst {
            return Err(FlowError::InvalidConfig {
                reason: format!("{tokens} tokens requested, burst is {}", self.burst),
            });
        }
        if self.rate == 0 && tokens > 0 {
            return Err(FlowError::InvalidConfig {
                reason: "bucket has a zero refill rate".to_string(),
            });
        }

        // Time spent idle past the drain time does not bank tokens beyond
        // the burst.
        self.drained_at_us = self
            .drained_at_us
            .max(now_us)
            .saturating_add(self.refill_time_us(tokens));
        Ok(self
            .drained_at_us
            .saturating_sub(self.refill_time_us(self.burst))
            .max(now_us))
    }

    /// Microseconds the bucket needs to refill `tokens`.
    fn refill_time_us(&self, tokens: u64) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        let us = u128::from(tokens) * MICROS_PER_SEC / u128::from(self.rate);
        u64::try_from(us).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_burst_is_immediate() {
        let mut bucket = TokenBucket::new(&TokenBucketConfig::new(100, 10), 5_000);
        assert_eq!(bucket.consume_with_wait(30, 5_000).unwrap(), 5_000);
        assert_eq!(bucket.consume_with_wait(70, 5_000).unwrap(), 5_000);
        // 5 more tokens at 10/s.
        assert_eq!(bucket.consume_with_wait(5, 5_000).unwrap(), 505_000);
    }

    #[test]
    fn test_refill_is_capped_at_burst() {
        let mut bucket = TokenBucket::new(&TokenBucketConfig::new(100, 10), 0);
        bucket.consume_with_wait(100, 0).unwrap();

        // Long idle: only one burst is available again.
        assert_eq!(bucket.consume_with_wait(100, 100_000_000).unwrap(), 100_000_000);
        assert_eq!(bucket.consume_with_wait(10, 100_000_000).unwrap(), 101_000_000);
    }

    #[test]
    fn test_time_going_backwards_grants_nothing_extra() {
        let mut bucket = TokenBucket::new(&TokenBucketConfig::new(100, 10), 1_000_000);
        bucket.consume_with_wait(100, 1_000_000).unwrap();
        assert_eq!(bucket.consume_with_wait(1, 500_000).unwrap(), 1_100_000);
    }

    #[test]
    fn test_reservations_are_paced() {
        let mut bucket = TokenBucket::new(&TokenBucketConfig::per_second(100), 0);

        assert_eq!(bucket.consume_with_wait(100, 0).unwrap(), 0);
        assert_eq!(bucket.consume_with_wait(100, 0).unwrap(), 1_000_000);
        assert_eq!(bucket.consume_with_wait(50, 0).unwrap(), 1_500_000);

        // Waiting past the last reservation does not bank extra tokens.
        assert_eq!(bucket.consume_with_wait(100, 2_500_000).unwrap(), 2_500_000);
        assert_eq!(bucket.consume_with_wait(100, 2_500_000).unwrap(), 3_500_000);
    }

    #[test]
    fn test_request_over_burst_rejected() {
        let mut bucket = TokenBucket::new(&TokenBucketConfig::new(100, 10), 0);
        assert!(matches!(
            bucket.consume_with_wait(101, 0),
            Err(FlowError::InvalidConfig { .. })
        ));
        // A rejected request reserves nothing.
        assert_eq!(bucket.consume_with_wait(100, 0).unwrap(), 0);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut bucket = TokenBucket::new(&TokenBucketConfig::new(10, 0), 0);
        assert!(matches!(
            bucket.consume_with_wait(1, 0),
            Err(FlowError::InvalidConfig { .. })
        ));
        bucket.consume_with_wait(0, 0).unwrap();
    }
}
