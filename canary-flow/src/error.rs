//! Rate limiting errors.

use thiserror::Error;

/// A request the rate limiter refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// The request can never be satisfied by this bucket.
    #[error("invalid rate limiter request: {reason}")]
    InvalidConfig {
        /// What is wrong with the request.
        reason: String,
    },
}

/// Result of a rate limiting operation.
pub type FlowResult<T> = Result<T, FlowError>;
