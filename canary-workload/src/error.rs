//! Errors of a continuous test run.

use std::fmt;
use std::time::Duration;

use canary_flow::FlowError;
use thiserror::Error;

use crate::client::ClientError;
use crate::model::Timestamp;
use crate::verification::VerifyError;

/// Kind of query a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Range query.
    Range,
    /// Instant query.
    Instant,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range => f.write_str("range"),
            Self::Instant => f.write_str("instant"),
        }
    }
}

/// A failure of a continuous test.
#[derive(Debug, Error)]
pub enum TestError {
    /// Writing a batch failed with a transport error or a 5xx status.
    #[error("failed to remote write series of {metric} at {timestamp}: {source}")]
    Write {
        /// Metric being written.
        metric: String,
        /// Timestamp of the batch.
        timestamp: Timestamp,
        /// Client failure.
        source: ClientError,
    },

    /// A query could not be executed.
    #[error("failed to execute {kind} query {query}: {source}")]
    Query {
        /// Range or instant.
        kind: QueryKind,
        /// Query string.
        query: String,
        /// Client failure.
        source: ClientError,
    },

    /// A query returned data that does not match what was written.
    #[error("{kind} query result check failed for {query}: {source}")]
    Check {
        /// Range or instant.
        kind: QueryKind,
        /// Query string.
        query: String,
        /// Mismatch.
        source: VerifyError,
    },

    /// Nothing has been written successfully, so there is nothing to query.
    #[error("no valid time range to query")]
    NoQueryRange,

    /// Everything written is older than the max query age.
    #[error(
        "no valid time range to query after honoring configured max query age \
         (min {min}, max {max}, max age {max_query_age:?})"
    )]
    QueryRangeTooOld {
        /// Oldest verifiable timestamp.
        min: Timestamp,
        /// Newest verifiable timestamp.
        max: Timestamp,
        /// Configured max query age.
        max_query_age: Duration,
    },

    /// The run was interrupted by shutdown.
    #[error("test run cancelled")]
    Cancelled,

    /// The write rate limiter refused a batch.
    #[error("rate limiter: {0}")]
    RateLimit(#[from] FlowError),

    /// Several failures in one run.
    #[error(transparent)]
    Multiple(MultiError),
}

impl TestError {
    /// Returns true if the run was cancelled rather than failed.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failures collected over one run.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<TestError>,
}

impl MultiError {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Adds a failure. Nested collections are flattened.
    pub fn add(&mut self, error: TestError) {
        match error {
            TestError::Multiple(nested) => self.errors.extend(nested.errors),
            other => self.errors.push(other),
        }
    }

    /// Returns the collected failures.
    #[must_use]
    pub fn errors(&self) -> &[TestError] {
        &self.errors
    }

    /// Returns the number of collected failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts the collection into the outcome of a run.
    ///
    /// # Errors
    ///
    /// Returns `TestError::Multiple` if at least one failure was collected.
    pub fn into_result(self) -> Result<(), TestError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(TestError::Multiple(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "{} errors: ", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_multi_error_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn test_multi_error_flattens_and_formats() {
        let mut inner = MultiError::new();
        inner.add(TestError::NoQueryRange);
        inner.add(TestError::Write {
            metric: "canary_sine_wave".to_string(),
            timestamp: 20_000,
            source: ClientError::status(503, "unavailable"),
        });

        let mut outer = MultiError::new();
        outer.add(inner.into_result().unwrap_err());
        assert_eq!(outer.len(), 2);

        let message = outer.to_string();
        assert!(message.starts_with("2 errors: no valid time range to query; "));
        assert!(message.contains("HTTP status 503"));
    }

    #[test]
    fn test_single_error_message() {
        let mut errors = MultiError::new();
        errors.add(TestError::NoQueryRange);
        assert_eq!(
            errors.into_result().unwrap_err().to_string(),
            "no valid time range to query"
        );
    }
}
