//! Rate limiting for the canary write path.
//!
//! - **Token bucket**: a deterministic bucket whose methods take the current
//!   time as a parameter, so it can run under a real or a simulated clock.
//! - **Rate limiter**: an async wrapper around the bucket, shared by every
//!   profile of a test run, that turns reservations into `tokio` sleeps.
//!
//! # Example
//!
//! ```rust
//! use canary_flow::{TokenBucket, TokenBucketConfig};
//!
//! // One token per series per second, with a burst of one full batch.
//! let config = TokenBucketConfig::per_second(1_000);
//! let mut bucket = TokenBucket::new(&config, 0);
//!
//! assert_eq!(bucket.consume_with_wait(1_000, 0).unwrap(), 0);
//! assert_eq!(bucket.consume_with_wait(1_000, 0).unwrap(), 1_000_000);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod limiter;
pub mod token_bucket;

pub use error::{FlowError, FlowResult};
pub use limiter::RateLimiter;
pub use token_bucket::{TokenBucket, TokenBucketConfig};
