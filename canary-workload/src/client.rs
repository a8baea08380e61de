//! The seam between the canary and the time-series store.
//!
//! Tests talk to the store only through [`StoreClient`]. The transport
//! behind it (remote write protocol, query API, auth) lives in the host
//! process; this crate ships a [`crate::RetryingClient`] decorator and an
//! in-memory [`crate::SimulatedStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Matrix, TimeSeries, Timestamp, Vector};

/// Errors returned by a store client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The store answered with a non-2xx status.
    #[error("server returned HTTP status {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason.
        message: String,
    },

    /// The request never got a status back.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call was abandoned because the run is shutting down.
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Creates a status error.
    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code, or 0 when no status was received.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Status { code, .. } => *code,
            Self::Transport(_) | Self::Cancelled => 0,
        }
    }

    /// Returns true for 4xx statuses: the request itself was rejected.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns true if repeating the call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { code, .. } => *code >= 500,
            Self::Cancelled => false,
        }
    }
}

/// Per-query options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Whether the store may answer from its results cache.
    pub results_cache_enabled: bool,
}

impl QueryOptions {
    /// Options with the results cache enabled.
    pub const CACHED: Self = Self {
        results_cache_enabled: true,
    };

    /// Options with the results cache disabled.
    pub const UNCACHED: Self = Self {
        results_cache_enabled: false,
    };
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::CACHED
    }
}

/// Client for writing series to and querying a time-series store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Writes a batch of series.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Status` for non-2xx answers and
    /// `ClientError::Transport` when no answer was received.
    async fn write_series(&self, series: &[TimeSeries]) -> Result<(), ClientError>;

    /// Runs an instant query evaluated at `ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn query(
        &self,
        query: &str,
        ts: Timestamp,
        options: QueryOptions,
    ) -> Result<Vector, ClientError>;

    /// Runs a range query over `[start, end]` with resolution `step`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn query_range(
        &self,
        query: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
        options: QueryOptions,
    ) -> Result<Matrix, ClientError>;
}

#[async_trait]
impl<T: StoreClient + ?Sized> StoreClient for Arc<T> {
    async fn write_series(&self, series: &[TimeSeries]) -> Result<(), ClientError> {
        (**self).write_series(series).await
    }

    async fn query(
        &self,
        query: &str,
        ts: Timestamp,
        options: QueryOptions,
    ) -> Result<Vector, ClientError> {
        (**self).query(query, ts, options).await
    }

    async fn query_range(
        &self,
        query: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
        options: QueryOptions,
    ) -> Result<Matrix, ClientError> {
        (**self).query_range(query, start, end, step, options).await
    }
}
