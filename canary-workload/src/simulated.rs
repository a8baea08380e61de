//! In-memory time-series store.
//!
//! Stores whatever is written and evaluates exactly the two aggregate query
//! shapes the canary issues:
//! - `sum(max_over_time(<metric>[1s]))`: per series, the highest float in
//!   `(t - 1s, t]`, summed over series.
//! - `sum(<metric>)`: per series, the newest point within the lookback
//!   window, summed over series (histograms bucket by bucket).
//!
//! Anything else is rejected with a 400. Faults are injected by queueing
//! errors for upcoming calls, by dropping timestamps at write time, or by a
//! random write failure rate.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::client::{ClientError, QueryOptions, StoreClient};
use crate::model::{
    duration_ms, metric_name, Label, Matrix, SampleHistogram, SampleHistogramPair, SamplePair,
    SampleStream, TimeSeries, Timestamp, Vector, VectorSample,
};

/// Default lookback of instant vector selectors.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(5 * 60);

const MAX_OVER_TIME_RANGE_MS: i64 = 1_000;

#[derive(Debug, Default)]
struct StoredSeries {
    samples: BTreeMap<Timestamp, f64>,
    histograms: BTreeMap<Timestamp, SampleHistogram>,
}

#[derive(Debug)]
struct StoreState {
    metrics: HashMap<String, HashMap<Vec<Label>, StoredSeries>>,
    write_failures: VecDeque<ClientError>,
    query_failures: VecDeque<ClientError>,
    dropped_timestamps: HashSet<Timestamp>,
    write_failure_rate: f64,
    rng: ChaCha8Rng,
    write_calls: u64,
    query_calls: u64,
    uncached_query_calls: u64,
}

/// The query shapes the store can evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Aggregation {
    SumMaxOverTime(String),
    Sum(String),
}

impl Aggregation {
    fn parse(query: &str) -> Option<Self> {
        let query = query.trim();
        if let Some(metric) = query
            .strip_prefix("sum(max_over_time(")
            .and_then(|rest| rest.strip_suffix("[1s]))"))
        {
            return is_metric_name(metric).then(|| Self::SumMaxOverTime(metric.to_string()));
        }
        let metric = query.strip_prefix("sum(")?.strip_suffix(')')?;
        is_metric_name(metric).then(|| Self::Sum(metric.to_string()))
    }

    fn metric(&self) -> &str {
        match self {
            Self::SumMaxOverTime(metric) | Self::Sum(metric) => metric,
        }
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Compensated (Kahan-Neumaier) running sum.
#[derive(Debug, Default, Clone, Copy)]
struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    fn add(&mut self, value: f64) {
        let total = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - total) + value;
        } else {
            self.compensation += (value - total) + self.sum;
        }
        self.sum = total;
    }

    fn total(self) -> f64 {
        self.sum + self.compensation
    }
}

/// Running `sum()` of one metric at one timestamp.
///
/// Float values and histogram sums are added with compensation so that
/// summing many series does not drift from `value * series`.
#[derive(Debug, Default)]
struct Point {
    value: Option<KahanSum>,
    histogram: Option<(SampleHistogram, KahanSum)>,
}

impl Point {
    fn add_float(&mut self, value: f64) {
        self.value.get_or_insert_with(KahanSum::default).add(value);
    }

    fn add_histogram(&mut self, histogram: &SampleHistogram) {
        let (total, sum) = self.histogram.get_or_insert_with(Default::default);
        total.accumulate(histogram);
        sum.add(histogram.sum);
    }

    fn finish(self) -> (Option<f64>, Option<SampleHistogram>) {
        let value = self.value.map(KahanSum::total);
        let histogram = self.histogram.map(|(mut total, sum)| {
            total.sum = sum.total();
            total
        });
        (value, histogram)
    }
}

/// An in-memory [`StoreClient`].
#[derive(Debug)]
pub struct SimulatedStore {
    state: Mutex<StoreState>,
    lookback: Duration,
}

impl Default for SimulatedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedStore {
    /// Creates an empty store with the default lookback.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookback(DEFAULT_LOOKBACK)
    }

    /// Creates an empty store whose `sum(<metric>)` picks up points up to
    /// `lookback` old.
    #[must_use]
    pub fn with_lookback(lookback: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState {
                metrics: HashMap::new(),
                write_failures: VecDeque::new(),
                query_failures: VecDeque::new(),
                dropped_timestamps: HashSet::new(),
                write_failure_rate: 0.0,
                rng: ChaCha8Rng::seed_from_u64(0),
                write_calls: 0,
                query_calls: 0,
                uncached_query_calls: 0,
            }),
            lookback,
        }
    }

    /// Fails a fraction of writes with a 503, drawn from a seeded generator.
    #[must_use]
    pub fn with_write_failure_rate(self, rate: f64, seed: u64) -> Self {
        {
            let mut state = self.lock();
            state.write_failure_rate = rate.clamp(0.0, 1.0);
            state.rng = ChaCha8Rng::seed_from_u64(seed);
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next writes with the given errors, one per call.
    pub fn fail_next_writes(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.lock().write_failures.extend(errors);
    }

    /// Fails the next queries (instant or range) with the given errors, one
    /// per call.
    pub fn fail_next_queries(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.lock().query_failures.extend(errors);
    }

    /// Acknowledges writes at `ts` without storing them.
    pub fn drop_timestamp(&self, ts: Timestamp) {
        self.lock().dropped_timestamps.insert(ts);
    }

    /// Returns the number of write calls received.
    #[must_use]
    pub fn write_calls(&self) -> u64 {
        self.lock().write_calls
    }

    /// Returns the number of query calls received, instant and range.
    #[must_use]
    pub fn query_calls(&self) -> u64 {
        self.lock().query_calls
    }

    /// Returns the number of query calls that bypassed the results cache.
    #[must_use]
    pub fn uncached_query_calls(&self) -> u64 {
        self.lock().uncached_query_calls
    }

    /// Returns the number of distinct series stored for `metric`.
    #[must_use]
    pub fn series_count(&self, metric: &str) -> usize {
        self.lock().metrics.get(metric).map_or(0, HashMap::len)
    }

    /// Starts a query call, returning a queued failure if there is one.
    fn begin_query(
        &self,
        query: &str,
        options: QueryOptions,
    ) -> Result<(MutexGuard<'_, StoreState>, Aggregation), ClientError> {
        let mut state = self.lock();
        state.query_calls += 1;
        if !options.results_cache_enabled {
            state.uncached_query_calls += 1;
        }
        if let Some(err) = state.query_failures.pop_front() {
            return Err(err);
        }
        let aggregation = Aggregation::parse(query).ok_or_else(|| {
            ClientError::status(400, format!("unsupported query: {query}"))
        })?;
        Ok((state, aggregation))
    }

    fn evaluate(&self, state: &StoreState, aggregation: &Aggregation, t: Timestamp) -> Point {
        let mut point = Point::default();
        let Some(series) = state.metrics.get(aggregation.metric()) else {
            return point;
        };

        match aggregation {
            Aggregation::SumMaxOverTime(_) => {
                let window = (
                    Bound::Excluded(t - MAX_OVER_TIME_RANGE_MS),
                    Bound::Included(t),
                );
                for stored in series.values() {
                    let max = stored
                        .samples
                        .range(window)
                        .map(|(_, v)| *v)
                        .reduce(f64::max);
                    if let Some(max) = max {
                        point.add_float(max);
                    }
                }
            }
            Aggregation::Sum(_) => {
                let oldest = t - duration_ms(self.lookback);
                for stored in series.values() {
                    let float = stored
                        .samples
                        .range(..=t)
                        .next_back()
                        .filter(|(ts, _)| **ts > oldest);
                    let histogram = stored
                        .histograms
                        .range(..=t)
                        .next_back()
                        .filter(|(ts, _)| **ts > oldest);

                    // The newest point wins when a series holds both kinds.
                    match (float, histogram) {
                        (Some((fts, v)), Some((hts, _))) if fts > hts => point.add_float(*v),
                        (Some((_, v)), None) => point.add_float(*v),
                        (_, Some((_, h))) => point.add_histogram(h),
                        (None, None) => {}
                    }
                }
            }
        }
        point
    }
}

#[async_trait]
impl StoreClient for SimulatedStore {
    async fn write_series(&self, series: &[TimeSeries]) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.write_calls += 1;
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        if state.write_failure_rate > 0.0 {
            let rate = state.write_failure_rate;
            if state.rng.gen_bool(rate) {
                return Err(ClientError::status(503, "simulated write failure"));
            }
        }

        for ts in series {
            let Some(name) = metric_name(&ts.labels) else {
                return Err(ClientError::status(400, "series without metric name"));
            };
            let name = name.to_string();
            let dropped = &state.dropped_timestamps;
            let samples: Vec<_> = ts
                .samples
                .iter()
                .filter(|s| !dropped.contains(&s.timestamp))
                .map(|s| (s.timestamp, s.value))
                .collect();
            let histograms: Vec<_> = ts
                .histograms
                .iter()
                .filter(|h| !dropped.contains(&h.timestamp))
                .map(|h| (h.timestamp, h.to_sample_histogram()))
                .collect();

            let stored = state
                .metrics
                .entry(name)
                .or_default()
                .entry(ts.labels.clone())
                .or_default();
            stored.samples.extend(samples);
            stored.histograms.extend(histograms);
        }
        Ok(())
    }

    async fn query(
        &self,
        query: &str,
        ts: Timestamp,
        options: QueryOptions,
    ) -> Result<Vector, ClientError> {
        let (state, aggregation) = self.begin_query(query, options)?;
        let (value, histogram) = self.evaluate(&state, &aggregation, ts).finish();

        let mut vector = Vector::new();
        if let Some(value) = value {
            vector.push(VectorSample {
                metric: Vec::new(),
                timestamp: ts,
                value,
                histogram: None,
            });
        }
        if let Some(histogram) = histogram {
            vector.push(VectorSample {
                metric: Vec::new(),
                timestamp: ts,
                value: 0.0,
                histogram: Some(histogram),
            });
        }
        Ok(vector)
    }

    async fn query_range(
        &self,
        query: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
        options: QueryOptions,
    ) -> Result<Matrix, ClientError> {
        let (state, aggregation) = self.begin_query(query, options)?;
        let step_ms = duration_ms(step);
        if step_ms <= 0 {
            return Err(ClientError::status(
                400,
                "zero or negative query resolution step widths are not accepted",
            ));
        }
        if end < start {
            return Err(ClientError::status(400, "end timestamp must not be before start time"));
        }

        let mut stream = SampleStream::default();
        let mut t = start;
        while t <= end {
            let (value, histogram) = self.evaluate(&state, &aggregation, t).finish();
            if let Some(value) = value {
                stream.values.push(SamplePair { timestamp: t, value });
            }
            if let Some(histogram) = histogram {
                stream.histograms.push(SampleHistogramPair {
                    timestamp: t,
                    histogram,
                });
            }
            t += step_ms;
        }

        if stream.values.is_empty() && stream.histograms.is_empty() {
            return Ok(Matrix::new());
        }
        Ok(vec![stream])
    }
}
