//! Async rate limiter shared between tasks.
//!
//! Wraps a [`TokenBucket`] behind a mutex and converts its reservations into
//! `tokio` sleeps. Dropping a pending `wait_n` future abandons the wait, so
//! callers cancel by dropping (or by losing a `tokio::select!`).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::FlowResult;
use crate::token_bucket::{TokenBucket, TokenBucketConfig};

/// A token bucket driven by the `tokio` clock.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    origin: Instant,
}

impl RateLimiter {
    /// Creates a rate limiter from a bucket configuration.
    #[must_use]
    pub fn new(config: &TokenBucketConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config, 0)),
            origin: Instant::now(),
        }
    }

    /// Creates a rate limiter admitting `rate` tokens per second, with a
    /// burst of the same size.
    #[must_use]
    pub fn per_second(rate: u64) -> Self {
        Self::new(&TokenBucketConfig::per_second(rate))
    }

    #[allow(clippy::cast_possible_truncation)] // u64 micros covers ~584k years.
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Waits until `tokens` tokens are available and consumes them.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if `tokens` exceeds the burst size.
    pub async fn wait_n(&self, tokens: u64) -> FlowResult<()> {
        let now_us = self.now_us();
        let ready_us = self
            .bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .consume_with_wait(tokens, now_us)?;

        if ready_us > now_us {
            tokio::time::sleep(Duration::from_micros(ready_us - now_us)).await;
        }
        Ok(())
    }
}
