//! Wire-level data model shared with the time-series store.
//!
//! Write requests carry [`TimeSeries`] holding either float samples or native
//! (exponential-bucket) [`Histogram`]s. Query responses come back as a
//! [`Matrix`] (range queries) or a [`Vector`] (instant queries), where
//! histograms are rendered as explicit-bucket [`SampleHistogram`]s.

use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
#[must_use]
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Rounds `ts` down to a multiple of `interval`.
#[must_use]
pub fn align_to_interval(ts: Timestamp, interval: Duration) -> Timestamp {
    let interval_ms = duration_ms(interval).max(1);
    ts - ts.rem_euclid(interval_ms)
}

/// A single label pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Creates a label pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Name of the label holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Returns the metric name of a label set, if present.
#[must_use]
pub fn metric_name(labels: &[Label]) -> Option<&str> {
    labels
        .iter()
        .find(|l| l.name == METRIC_NAME_LABEL)
        .map(|l| l.value.as_str())
}

/// A float sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Sample value.
    pub value: f64,
    /// Sample timestamp.
    pub timestamp: Timestamp,
}

/// One series in a write request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    /// Series labels, including `__name__`.
    pub labels: Vec<Label>,
    /// Float samples.
    pub samples: Vec<Sample>,
    /// Native histogram samples.
    pub histograms: Vec<Histogram>,
}

/// A run of consecutive buckets in a native histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpan {
    /// Gap to the previous span (or start index for the first span).
    pub offset: i32,
    /// Number of consecutive buckets.
    pub length: u32,
}

/// Observation count of a native histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistogramCount {
    /// Integer histogram count.
    Int(u64),
    /// Float histogram count.
    Float(f64),
}

impl HistogramCount {
    /// Returns the count as a float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

/// Bucket population of one side of a native histogram.
#[derive(Debug, Clone, PartialEq)]
pub enum Buckets {
    /// Integer histograms: each entry is the delta to the previous bucket.
    Deltas(Vec<i64>),
    /// Float histograms: absolute bucket counts.
    Counts(Vec<f64>),
}

impl Buckets {
    /// Decodes the buckets into absolute counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn absolute_counts(&self) -> Vec<f64> {
        match self {
            Self::Deltas(deltas) => {
                let mut current = 0i64;
                deltas
                    .iter()
                    .map(|d| {
                        current += d;
                        current as f64
                    })
                    .collect()
            }
            Self::Counts(counts) => counts.clone(),
        }
    }
}

/// Counter reset hint carried by a native histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetHint {
    /// The store decides whether a decrease is a counter reset.
    #[default]
    Unknown,
    /// The histogram is a gauge; decreases are expected.
    Gauge,
}

/// A native histogram as sent in a write request.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Total number of observations.
    pub count: HistogramCount,
    /// Sum of observations.
    pub sum: f64,
    /// Resolution of the exponential buckets.
    pub schema: i32,
    /// Width of the zero bucket.
    pub zero_threshold: f64,
    /// Observations in the zero bucket.
    pub zero_count: HistogramCount,
    /// Negative bucket layout.
    pub negative_spans: Vec<BucketSpan>,
    /// Negative bucket population.
    pub negative_buckets: Buckets,
    /// Positive bucket layout.
    pub positive_spans: Vec<BucketSpan>,
    /// Positive bucket population.
    pub positive_buckets: Buckets,
    /// Counter reset hint.
    pub reset_hint: ResetHint,
    /// Sample timestamp.
    pub timestamp: Timestamp,
}

impl Histogram {
    /// Renders the histogram the way a query returns it: explicit bucket
    /// bounds with absolute counts, empty buckets omitted.
    #[must_use]
    pub fn to_sample_histogram(&self) -> SampleHistogram {
        let mut buckets = Vec::new();

        // Negative side, most negative first.
        let mut negative = expand_buckets(&self.negative_spans, &self.negative_buckets);
        negative.reverse();
        for (idx, count) in negative {
            buckets.push(HistogramBucket {
                boundaries: Boundaries::OpenRight,
                lower: -bucket_upper_bound(idx, self.schema),
                upper: -bucket_upper_bound(idx - 1, self.schema),
                count,
            });
        }

        let zero_count = self.zero_count.as_f64();
        if zero_count > 0.0 {
            buckets.push(HistogramBucket {
                boundaries: Boundaries::ClosedBoth,
                lower: -self.zero_threshold,
                upper: self.zero_threshold,
                count: zero_count,
            });
        }

        for (idx, count) in expand_buckets(&self.positive_spans, &self.positive_buckets) {
            buckets.push(HistogramBucket {
                boundaries: Boundaries::OpenLeft,
                lower: bucket_upper_bound(idx - 1, self.schema),
                upper: bucket_upper_bound(idx, self.schema),
                count,
            });
        }

        SampleHistogram {
            count: self.count.as_f64(),
            sum: self.sum,
            buckets,
        }
    }
}

/// Pairs every non-empty bucket with its absolute bucket index.
fn expand_buckets(spans: &[BucketSpan], buckets: &Buckets) -> Vec<(i32, f64)> {
    let counts = buckets.absolute_counts();
    let mut out = Vec::with_capacity(counts.len());
    let mut counts = counts.into_iter();
    let mut idx = 0i32;

    for span in spans {
        idx += span.offset;
        for _ in 0..span.length {
            let Some(count) = counts.next() else {
                return out;
            };
            if count != 0.0 {
                out.push((idx, count));
            }
            idx += 1;
        }
    }
    out
}

/// Upper bound of exponential bucket `idx`: `2^(idx · 2^-schema)`.
fn bucket_upper_bound(idx: i32, schema: i32) -> f64 {
    (f64::from(idx) * (-f64::from(schema)).exp2()).exp2()
}

/// Which ends of a query-side bucket are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundaries {
    /// `(lower, upper]`
    OpenLeft,
    /// `[lower, upper)`
    OpenRight,
    /// `(lower, upper)`
    OpenBoth,
    /// `[lower, upper]`
    ClosedBoth,
}

/// One explicit bucket of a query-side histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBucket {
    /// Open/closed ends.
    pub boundaries: Boundaries,
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
    /// Observations in the bucket.
    pub count: f64,
}

/// A histogram as returned by a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleHistogram {
    /// Total number of observations.
    pub count: f64,
    /// Sum of observations.
    pub sum: f64,
    /// Non-empty buckets in ascending order.
    pub buckets: Vec<HistogramBucket>,
}

impl SampleHistogram {
    /// Adds another histogram into this one, as `sum()` aggregation does.
    pub fn accumulate(&mut self, other: &Self) {
        self.count += other.count;
        self.sum += other.sum;
        for bucket in &other.buckets {
            if let Some(existing) = self.buckets.iter_mut().find(|b| {
                b.boundaries == bucket.boundaries && b.lower == bucket.lower && b.upper == bucket.upper
            }) {
                existing.count += bucket.count;
            } else {
                self.buckets.push(*bucket);
            }
        }
        self.buckets
            .sort_by(|a, b| a.lower.total_cmp(&b.lower).then(a.upper.total_cmp(&b.upper)));
    }
}

/// A float point in a query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePair {
    /// Point timestamp.
    pub timestamp: Timestamp,
    /// Point value.
    pub value: f64,
}

/// A histogram point in a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleHistogramPair {
    /// Point timestamp.
    pub timestamp: Timestamp,
    /// Point value.
    pub histogram: SampleHistogram,
}

/// One series of a range query result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleStream {
    /// Series labels (empty for aggregations).
    pub metric: Vec<Label>,
    /// Float points, oldest first.
    pub values: Vec<SamplePair>,
    /// Histogram points, oldest first.
    pub histograms: Vec<SampleHistogramPair>,
}

/// Range query result.
pub type Matrix = Vec<SampleStream>;

/// One series of an instant query result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    /// Series labels (empty for aggregations).
    pub metric: Vec<Label>,
    /// Evaluation timestamp.
    pub timestamp: Timestamp,
    /// Float value; meaningless when `histogram` is set.
    pub value: f64,
    /// Histogram value, if the series holds histograms.
    pub histogram: Option<SampleHistogram>,
}

/// Instant query result.
pub type Vector = Vec<VectorSample>;

/// Converts an instant query result into a one-point-per-series matrix, so
/// both query kinds go through the same verification.
#[must_use]
pub fn vector_to_matrix(vector: Vector) -> Matrix {
    vector
        .into_iter()
        .map(|entry| {
            let mut stream = SampleStream {
                metric: entry.metric,
                ..SampleStream::default()
            };
            match entry.histogram {
                Some(histogram) => stream.histograms.push(SampleHistogramPair {
                    timestamp: entry.timestamp,
                    histogram,
                }),
                None => stream.values.push(SamplePair {
                    timestamp: entry.timestamp,
                    value: entry.value,
                }),
            }
            stream
        })
        .collect()
}
