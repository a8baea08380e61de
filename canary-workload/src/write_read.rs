//! The write/read series test.
//!
//! Every run, each enabled profile:
//! 1. writes one batch per write interval from its cursor up to now,
//!    throttled by a rate limiter shared with the other profiles;
//! 2. plans its query windows from what is known to be verifiable;
//! 3. runs every window as a range and an instant query, once with the
//!    results cache and once without, and verifies each result.
//!
//! Profiles run concurrently and never share a history. Failures are
//! collected and reported together at the end of the run; cancellation ends
//! the run at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use canary_flow::RateLimiter;
use futures::future::try_join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::client::{ClientError, QueryOptions, StoreClient};
use crate::config::WriteReadSeriesConfig;
use crate::error::{MultiError, QueryKind, TestError};
use crate::history::{QueryRange, WriteReadHistory};
use crate::model::{align_to_interval, duration_ms, vector_to_matrix, Timestamp};
use crate::planner::{plan_queries, query_step, QueryPlan};
use crate::profile::{MetricProfile, ProfileRegistry};
use crate::recovery::recover;
use crate::runner::ContinuousTest;
use crate::test_metrics::TestMetrics;
use crate::verification::verify_samples_sum;

/// Interval between two written points of a series.
pub const WRITE_INTERVAL: Duration = Duration::from_secs(20);

/// Recovered history whose newest point is older than this is discarded.
pub const WRITE_MAX_AGE: Duration = Duration::from_secs(50 * 60);

/// Name of the write/read series test.
pub const TEST_NAME: &str = "write-read-series";

/// Writes synthetic series and verifies they can be queried back intact.
#[derive(Debug)]
pub struct WriteReadSeriesTest<C> {
    client: C,
    config: WriteReadSeriesConfig,
    histories: Vec<(MetricProfile, WriteReadHistory)>,
    metrics: TestMetrics,
    rng: ChaCha8Rng,
}

impl<C: StoreClient> WriteReadSeriesTest<C> {
    /// Creates the test. `seed` makes the random query windows reproducible.
    #[must_use]
    pub fn new(client: C, config: WriteReadSeriesConfig, seed: Option<u64>) -> Self {
        let histories = ProfileRegistry::from_config(&config)
            .profiles()
            .iter()
            .map(|&profile| (profile, WriteReadHistory::new()))
            .collect();
        let rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);

        Self {
            client,
            config,
            histories,
            metrics: TestMetrics::new(TEST_NAME),
            rng,
        }
    }

    /// Returns the store client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Returns the test metrics.
    #[must_use]
    pub const fn metrics(&self) -> &TestMetrics {
        &self.metrics
    }

    /// Returns the history of `profile`, if it is enabled.
    #[must_use]
    pub fn history(&self, profile: MetricProfile) -> Option<&WriteReadHistory> {
        self.histories
            .iter()
            .find(|(p, _)| *p == profile)
            .map(|(_, history)| history)
    }
}

#[async_trait]
impl<C: StoreClient> ContinuousTest for WriteReadSeriesTest<C> {
    fn name(&self) -> &str {
        TEST_NAME
    }

    async fn init(&mut self, now: Timestamp) -> Result<(), TestError> {
        info!("Finding previously written samples to recover writes and reads from the previous run");
        for (profile, history) in &mut self.histories {
            *history = recover(
                &self.client,
                *profile,
                now,
                self.config.num_series,
                self.config.max_query_age(),
            )
            .await?;
        }
        Ok(())
    }

    async fn run(&mut self, now: Timestamp) -> Result<(), TestError> {
        // One token per series per second: catching up after downtime must
        // not hit the store's ingestion limits.
        let rate = u64::try_from(self.config.num_series).unwrap_or(u64::MAX);
        let limiter = Arc::new(RateLimiter::per_second(rate));

        let (client, config, metrics, rng) = (&self.client, &self.config, &self.metrics, &mut self.rng);
        let runs = self.histories.iter_mut().map(|(profile, history)| {
            let run = ProfileRun {
                client,
                config,
                metrics,
                limiter: Arc::clone(&limiter),
                profile: *profile,
            };
            run.run(now, history, ChaCha8Rng::seed_from_u64(rng.gen()))
        });

        let mut errors = MultiError::new();
        for profile_errors in try_join_all(runs).await? {
            for error in profile_errors.errors {
                errors.add(error);
            }
        }
        errors.into_result()
    }
}

/// Outcome of one profile's run that did not abort it.
#[derive(Debug, Default)]
struct ProfileErrors {
    errors: Vec<TestError>,
}

impl ProfileErrors {
    /// Records `result`, passing cancellation up instead.
    fn add(&mut self, result: Result<(), TestError>) -> Result<(), TestError> {
        match result {
            Ok(()) => Ok(()),
            Err(TestError::Cancelled) => Err(TestError::Cancelled),
            Err(e) => {
                self.errors.push(e);
                Ok(())
            }
        }
    }
}

/// Everything one profile needs during a run.
struct ProfileRun<'a, C> {
    client: &'a C,
    config: &'a WriteReadSeriesConfig,
    metrics: &'a TestMetrics,
    limiter: Arc<RateLimiter>,
    profile: MetricProfile,
}

impl<C: StoreClient> ProfileRun<'_, C> {
    async fn run(
        self,
        now: Timestamp,
        history: &mut WriteReadHistory,
        mut rng: ChaCha8Rng,
    ) -> Result<ProfileErrors, TestError> {
        let mut errors = ProfileErrors::default();
        let tokens = u64::try_from(self.config.num_series).unwrap_or(u64::MAX);

        let mut ts = next_write_timestamp(now, history);
        while ts <= now {
            if let Err(e) = self.limiter.wait_n(tokens).await {
                errors.add(Err(e.into()))?;
                return Ok(errors);
            }
            let written = self.write(ts, history).await;
            if written.is_err() {
                errors.add(written)?;
                break;
            }
            ts = next_write_timestamp(now, history);
        }

        let plan = match plan_queries(now, history, self.config.max_query_age(), &mut rng) {
            Ok(plan) => plan,
            Err(e) => {
                info!(metric = self.profile.metric_name(), reason = %e, "Skipped queries");
                errors.add(Err(e))?;
                QueryPlan::default()
            }
        };
        let Some(bounds) = history.query_range() else {
            return Ok(errors);
        };

        let query = self.profile.query_sum(self.profile.metric_name());
        for &(start, end) in &plan.ranges {
            for options in [QueryOptions::CACHED, QueryOptions::UNCACHED] {
                let result = self.range_query(&query, bounds, start, end, options).await;
                errors.add(result)?;
            }
        }
        for &ts in &plan.instants {
            for options in [QueryOptions::CACHED, QueryOptions::UNCACHED] {
                let result = self.instant_query(&query, bounds, ts, options).await;
                errors.add(result)?;
            }
        }
        Ok(errors)
    }

    /// Writes the batch at `ts` and advances the history.
    ///
    /// A rejected (4xx) batch moves the cursor on and clears the queryable
    /// range: retrying would not help and the data may be partial. Any other
    /// failure leaves the history untouched so the batch is retried on the
    /// next run.
    async fn write(&self, ts: Timestamp, history: &mut WriteReadHistory) -> Result<(), TestError> {
        let metric = self.profile.metric_name();
        let type_label = self.profile.type_label();
        let series = self.profile.series(metric, ts, self.config.num_series);

        let started = Instant::now();
        let result = self.client.write_series(&series).await;
        if matches!(result, Err(ClientError::Cancelled)) {
            return Err(TestError::Cancelled);
        }
        self.metrics.record_write(type_label, started.elapsed());

        match result {
            Ok(()) => {
                debug!(metric, timestamp = ts, num_series = series.len(), "Remote write series succeeded");
                history.record_write_ok(ts);
                Ok(())
            }
            Err(e) => {
                let status_code = e.status_code();
                self.metrics.record_write_failed(type_label, status_code);
                warn!(metric, timestamp = ts, status_code, error = %e, "Failed to remote write series");

                if e.is_client_error() {
                    history.record_write_rejected(ts);
                    return Ok(());
                }
                Err(TestError::Write {
                    metric: metric.to_string(),
                    timestamp: ts,
                    source: e,
                })
            }
        }
    }

    async fn range_query(
        &self,
        query: &str,
        bounds: QueryRange,
        start: Timestamp,
        end: Timestamp,
        options: QueryOptions,
    ) -> Result<(), TestError> {
        // Aligned to the write interval so every step lands on a written point.
        let start = bounds.min.max(align_to_interval(start, WRITE_INTERVAL));
        let end = bounds.max.min(align_to_interval(end, WRITE_INTERVAL));
        if end < start {
            return Ok(());
        }
        let step = query_step(start, end, WRITE_INTERVAL);
        let type_label = self.profile.type_label();
        debug!(
            query,
            start,
            end,
            step = ?step,
            results_cache = options.results_cache_enabled,
            "Running range query"
        );

        let started = Instant::now();
        let result = self.client.query_range(query, start, end, step, options).await;
        self.metrics.record_query(type_label, started.elapsed());
        let matrix = result.map_err(|e| self.query_failed(QueryKind::Range, query, options, e))?;

        self.metrics.record_check(type_label);
        let (_, checked) = verify_samples_sum(&matrix, self.config.num_series, step, |ts| {
            self.profile.value(ts)
        });
        checked.map_err(|e| self.check_failed(QueryKind::Range, query, options, e))
    }

    async fn instant_query(
        &self,
        query: &str,
        bounds: QueryRange,
        ts: Timestamp,
        options: QueryOptions,
    ) -> Result<(), TestError> {
        let ts = bounds.min.max(align_to_interval(ts, WRITE_INTERVAL));
        if ts > bounds.max {
            return Ok(());
        }
        let type_label = self.profile.type_label();
        debug!(query, ts, results_cache = options.results_cache_enabled, "Running instant query");

        let started = Instant::now();
        let result = self.client.query(query, ts, options).await;
        self.metrics.record_query(type_label, started.elapsed());
        let vector = result.map_err(|e| self.query_failed(QueryKind::Instant, query, options, e))?;

        self.metrics.record_check(type_label);
        let matrix = vector_to_matrix(vector);
        let (_, checked) = verify_samples_sum(&matrix, self.config.num_series, Duration::ZERO, |ts| {
            self.profile.value(ts)
        });
        checked.map_err(|e| self.check_failed(QueryKind::Instant, query, options, e))
    }

    fn query_failed(
        &self,
        kind: QueryKind,
        query: &str,
        options: QueryOptions,
        error: ClientError,
    ) -> TestError {
        if error == ClientError::Cancelled {
            return TestError::Cancelled;
        }
        self.metrics.record_query_failed(self.profile.type_label());
        warn!(
            query,
            results_cache = options.results_cache_enabled,
            error = %error,
            "Failed to execute {kind} query"
        );
        TestError::Query {
            kind,
            query: query.to_string(),
            source: error,
        }
    }

    fn check_failed(
        &self,
        kind: QueryKind,
        query: &str,
        options: QueryOptions,
        error: crate::verification::VerifyError,
    ) -> TestError {
        self.metrics.record_check_failed(self.profile.type_label());
        warn!(
            query,
            results_cache = options.results_cache_enabled,
            error = %error,
            "{kind} query result check failed"
        );
        TestError::Check {
            kind,
            query: query.to_string(),
            source: error,
        }
    }
}

/// Next timestamp to write: one interval after the last write, or the
/// current interval when nothing has been written yet.
fn next_write_timestamp(now: Timestamp, history: &WriteReadHistory) -> Timestamp {
    history.last_written().map_or_else(
        || align_to_interval(now, WRITE_INTERVAL),
        |last| last + duration_ms(WRITE_INTERVAL),
    )
}
