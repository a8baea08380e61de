//! Test metrics.
//!
//! Counters are kept as atomics so a run can be summarised without a
//! recorder installed, and every increment is mirrored into the `metrics`
//! facade for whatever exporter the host process installs. Latencies go into
//! `hdrhistogram` histograms, in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;

/// Highest latency tracked, in microseconds (one minute).
const LATENCY_MAX_US: u64 = 60_000_000;

/// Counters and latencies of one continuous test.
#[derive(Debug)]
pub struct TestMetrics {
    test: String,
    writes_total: AtomicU64,
    writes_failed_total: AtomicU64,
    queries_total: AtomicU64,
    queries_failed_total: AtomicU64,
    checks_total: AtomicU64,
    checks_failed_total: AtomicU64,
    write_latency: Mutex<Histogram<u64>>,
    query_latency: Mutex<Histogram<u64>>,
}

impl TestMetrics {
    /// Creates metrics labelled with the test name.
    #[must_use]
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            writes_total: AtomicU64::new(0),
            writes_failed_total: AtomicU64::new(0),
            queries_total: AtomicU64::new(0),
            queries_failed_total: AtomicU64::new(0),
            checks_total: AtomicU64::new(0),
            checks_failed_total: AtomicU64::new(0),
            write_latency: Mutex::new(latency_histogram()),
            query_latency: Mutex::new(latency_histogram()),
        }
    }

    /// Records a write attempt and how long it took.
    pub fn record_write(&self, type_label: &'static str, latency: Duration) {
        self.writes_total.fetch_add(1, Ordering::Relaxed);
        record_latency(&self.write_latency, latency);
        metrics::counter!("canary_writes_total", "test" => self.test.clone(), "type" => type_label)
            .increment(1);
    }

    /// Records a failed write. Transport failures carry status code 0.
    pub fn record_write_failed(&self, type_label: &'static str, status_code: u16) {
        self.writes_failed_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "canary_writes_failed_total",
            "test" => self.test.clone(),
            "type" => type_label,
            "status_code" => status_code.to_string()
        )
        .increment(1);
    }

    /// Records a query and how long it took.
    pub fn record_query(&self, type_label: &'static str, latency: Duration) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        record_latency(&self.query_latency, latency);
        metrics::counter!("canary_queries_total", "test" => self.test.clone(), "type" => type_label)
            .increment(1);
    }

    /// Records a failed query.
    pub fn record_query_failed(&self, type_label: &'static str) {
        self.queries_failed_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "canary_queries_failed_total",
            "test" => self.test.clone(),
            "type" => type_label
        )
        .increment(1);
    }

    /// Records a query result check.
    pub fn record_check(&self, type_label: &'static str) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "canary_query_result_checks_total",
            "test" => self.test.clone(),
            "type" => type_label
        )
        .increment(1);
    }

    /// Records a failed query result check.
    pub fn record_check_failed(&self, type_label: &'static str) {
        self.checks_failed_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "canary_query_result_checks_failed_total",
            "test" => self.test.clone(),
            "type" => type_label
        )
        .increment(1);
    }

    /// Returns a point-in-time copy of every counter and latency summary.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes_total: self.writes_total.load(Ordering::Relaxed),
            writes_failed_total: self.writes_failed_total.load(Ordering::Relaxed),
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_failed_total: self.queries_failed_total.load(Ordering::Relaxed),
            checks_total: self.checks_total.load(Ordering::Relaxed),
            checks_failed_total: self.checks_failed_total.load(Ordering::Relaxed),
            write_latency: LatencySummary::from_histogram(&self.write_latency),
            query_latency: LatencySummary::from_histogram(&self.query_latency),
        }
    }
}

/// Latency percentiles in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencySummary {
    /// Median.
    pub p50_us: u64,
    /// 99th percentile.
    pub p99_us: u64,
    /// Maximum.
    pub max_us: u64,
}

impl LatencySummary {
    fn from_histogram(histogram: &Mutex<Histogram<u64>>) -> Self {
        let histogram = histogram.lock().unwrap_or_else(PoisonError::into_inner);
        if histogram.is_empty() {
            return Self::default();
        }
        Self {
            p50_us: histogram.value_at_quantile(0.50),
            p99_us: histogram.value_at_quantile(0.99),
            max_us: histogram.max(),
        }
    }
}

/// Snapshot of [`TestMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Write requests issued.
    pub writes_total: u64,
    /// Write requests answered with a non-2xx status or not answered.
    pub writes_failed_total: u64,
    /// Queries issued.
    pub queries_total: u64,
    /// Queries that failed.
    pub queries_failed_total: u64,
    /// Query results checked.
    pub checks_total: u64,
    /// Query results that did not match.
    pub checks_failed_total: u64,
    /// Write latency.
    pub write_latency: LatencySummary,
    /// Query latency.
    pub query_latency: LatencySummary,
}

fn latency_histogram() -> Histogram<u64> {
    Histogram::new_with_max(LATENCY_MAX_US, 3).expect("constant latency bounds are valid")
}

#[allow(clippy::cast_possible_truncation)]
fn record_latency(histogram: &Mutex<Histogram<u64>>, latency: Duration) {
    let micros = (latency.as_micros() as u64).clamp(1, LATENCY_MAX_US);
    histogram
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .saturating_record(micros);
}
