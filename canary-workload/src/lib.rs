//! Canary Workload: continuous write/read verification of a time-series store
//!
//! Writes deterministic synthetic series at a fixed interval, queries them back
//! through the store's query API and checks every returned point against the
//! value that was written. Lost, duplicated or corrupted data shows up as a
//! failed check long before users notice it.
//!
//! # Profiles
//!
//! - **Sine wave**: float samples following a 10 minute sine period.
//! - **Native histograms**: integer and float, counter and gauge histograms
//!   whose count and sum derive from the unix-seconds timestamp, with gauges
//!   flipping sign every minute.
//!
//! # Architecture
//!
//! The same test logic runs in two modes:
//! - **Real mode**: against a store reached through a host-provided
//!   [`StoreClient`]
//! - **Simulated mode**: against the in-memory [`SimulatedStore`], with fault
//!   injection
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use canary_workload::{
//!     ContinuousTest, RetryingClient, SimulatedStore, WriteReadSeriesConfig,
//!     WriteReadSeriesTest,
//! };
//!
//! let store = Arc::new(SimulatedStore::new());
//! let config = WriteReadSeriesConfig {
//!     num_series: 10,
//!     with_floats: true,
//!     ..WriteReadSeriesConfig::default()
//! };
//! let mut test = WriteReadSeriesTest::new(RetryingClient::new(store, 5), config, Some(42));
//!
//! test.init(now).await?;
//! test.run(now).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod history;
mod model;
mod planner;
mod recovery;
mod test_metrics;
mod verification;

pub mod client;
pub mod config;
pub mod error;
pub mod profile;
pub mod retry;
pub mod runner;
pub mod simulated;
pub mod write_read;

pub use client::{ClientError, QueryOptions, StoreClient};
pub use config::{CanaryConfig, ClientConfig, ConfigError, WriteReadSeriesConfig};
pub use error::{MultiError, QueryKind, TestError};
pub use history::{QueryRange, WriteReadHistory};
pub use model::{
    align_to_interval, duration_ms, metric_name, vector_to_matrix, Boundaries, BucketSpan, Buckets,
    Histogram, HistogramBucket, HistogramCount, Label, Matrix, ResetHint, Sample, SampleHistogram,
    SampleHistogramPair, SamplePair, SampleStream, TimeSeries, Timestamp, Vector, VectorSample,
    METRIC_NAME_LABEL,
};
pub use planner::{plan_queries, query_step, QueryPlan, MAX_POINTS_PER_QUERY};
pub use profile::{HistogramKind, MetricProfile, ProfileRegistry};
pub use recovery::{find_previously_written_time_range, recover, RECOVERY_WINDOW};
pub use retry::RetryingClient;
pub use runner::{Clock, ContinuousTest, Runner, RunnerStats, SteppingClock, SystemClock};
pub use simulated::SimulatedStore;
pub use test_metrics::{LatencySummary, MetricsSnapshot, TestMetrics};
pub use verification::{
    compare_sample_values, verify_samples_sum, PointKind, VerifyError, MAX_COMPARISON_DELTA,
};
pub use write_read::{WriteReadSeriesTest, TEST_NAME, WRITE_INTERVAL, WRITE_MAX_AGE};
