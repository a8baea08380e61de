//! Retrying store client.
//!
//! Transient failures (no answer, or a 5xx answer) are retried right away up
//! to a fixed number of attempts. Rejections (4xx) and cancellation are
//! returned as-is: repeating them cannot help.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use crate::client::{ClientError, QueryOptions, StoreClient};
use crate::model::{Matrix, TimeSeries, Timestamp, Vector};

/// A [`StoreClient`] decorator that retries transient failures.
#[derive(Debug)]
pub struct RetryingClient<C> {
    inner: C,
    max_retries: u32,
}

impl<C: StoreClient> RetryingClient<C> {
    /// Wraps `inner`, making at most `max_retries` attempts per call.
    #[must_use]
    pub fn new(inner: C, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries: max_retries.max(1),
        }
    }

    /// Returns the wrapped client.
    #[must_use]
    pub const fn inner(&self) -> &C {
        &self.inner
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ClientError>> + Send,
    {
        let mut tries = 0;
        let mut last_err = None;

        while tries < self.max_retries {
            match call().await {
                Ok(value) => {
                    observe_retries(operation, tries);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    error!(operation, attempt = tries, error = %e, "Error processing request");
                    last_err = Some(e);
                }
                Err(e) => {
                    observe_retries(operation, tries);
                    return Err(e);
                }
            }
            tries += 1;
        }

        observe_retries(operation, tries);
        Err(last_err.unwrap_or_else(|| ClientError::Transport("no attempt made".to_string())))
    }
}

fn observe_retries(operation: &'static str, tries: u32) {
    metrics::histogram!("canary_client_retries", "operation" => operation).record(f64::from(tries));
}

#[async_trait]
impl<C: StoreClient> StoreClient for RetryingClient<C> {
    async fn write_series(&self, series: &[TimeSeries]) -> Result<(), ClientError> {
        self.with_retries("write", || self.inner.write_series(series)).await
    }

    async fn query(
        &self,
        query: &str,
        ts: Timestamp,
        options: QueryOptions,
    ) -> Result<Vector, ClientError> {
        self.with_retries("query", || self.inner.query(query, ts, options)).await
    }

    async fn query_range(
        &self,
        query: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
        options: QueryOptions,
    ) -> Result<Matrix, ClientError> {
        self.with_retries("query_range", || {
            self.inner.query_range(query, start, end, step, options)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MetricProfile;
    use crate::simulated::SimulatedStore;

    fn batch() -> Vec<TimeSeries> {
        MetricProfile::SineWave.series("canary_sine_wave", 20_000, 1)
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let store = SimulatedStore::new();
        store.fail_next_writes([
            ClientError::Transport("connection reset".to_string()),
            ClientError::status(503, "unavailable"),
        ]);
        let client = RetryingClient::new(store, 5);

        client.write_series(&batch()).await.unwrap();
        assert_eq!(client.inner().write_calls(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let store = SimulatedStore::new();
        store.fail_next_writes([ClientError::status(400, "out of bounds")]);
        let client = RetryingClient::new(store, 5);

        let err = client.write_series(&batch()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(client.inner().write_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_not_retried() {
        let store = SimulatedStore::new();
        store.fail_next_queries([ClientError::Cancelled]);
        let client = RetryingClient::new(store, 5);

        let err = client
            .query("sum(canary_sine_wave)", 0, QueryOptions::CACHED)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Cancelled);
        assert_eq!(client.inner().query_calls(), 1);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let store = SimulatedStore::new();
        store.fail_next_queries([
            ClientError::status(500, "first"),
            ClientError::status(502, "second"),
            ClientError::status(503, "third"),
        ]);
        let client = RetryingClient::new(store, 3);

        let err = client
            .query_range(
                "sum(canary_sine_wave)",
                0,
                60_000,
                Duration::from_secs(20),
                QueryOptions::UNCACHED,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::status(503, "third"));
        assert_eq!(client.inner().query_calls(), 3);
    }
}
