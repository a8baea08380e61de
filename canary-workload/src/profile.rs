//! Synthetic metric profiles.
//!
//! Every profile is a pure function of the wall-clock timestamp: the writer
//! generates series from it and the verifier later re-derives the expected
//! aggregate from the same function, with no shared state in between.
//!
//! | Profile | Metric | Value |
//! |---------|--------|-------|
//! | `SineWave` | `canary_sine_wave` | `sin(2π · t / 10m)` |
//! | `IntCounter` | `canary_histogram_int_counter` | unix seconds |
//! | `FloatCounter` | `canary_histogram_float_counter` | unix seconds / 500000 |
//! | `IntGauge` | `canary_histogram_int_gauge` | as int counter, negated in even minutes |
//! | `FloatGauge` | `canary_histogram_float_gauge` | as float counter, negated in even minutes |

use std::f64::consts::PI;
use std::time::Duration;

use crate::config::WriteReadSeriesConfig;
use crate::model::{
    duration_ms, BucketSpan, Buckets, Histogram, HistogramCount, Label, ResetHint, Sample,
    SampleHistogram, TimeSeries, Timestamp, METRIC_NAME_LABEL,
};

/// Period of the sine wave profile.
pub const SINE_WAVE_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Label distinguishing the synthetic series of one profile.
pub const SERIES_ID_LABEL: &str = "series_id";

const HISTOGRAM_SCHEMA: i32 = 2;
const HISTOGRAM_ZERO_THRESHOLD: f64 = 0.001;
const HISTOGRAM_FLOAT_DIVISOR: f64 = 500_000.0;
const HISTOGRAM_SPANS: [BucketSpan; 3] = [
    BucketSpan { offset: 0, length: 1 },
    BucketSpan { offset: 3, length: 1 },
    BucketSpan { offset: 2, length: 2 },
];

/// Sum of a generated histogram with base value `value`.
///
/// Both the histogram's `sum` field and the expected per-series value used
/// by verification go through this function; they must never diverge.
#[must_use]
pub fn histogram_sum(value: f64) -> f64 {
    value * 10.0
}

/// Flavour of a histogram profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramKind {
    /// Integer buckets, never decreasing.
    IntCounter,
    /// Float buckets, never decreasing.
    FloatCounter,
    /// Integer buckets, sign flips every minute.
    IntGauge,
    /// Float buckets, sign flips every minute.
    FloatGauge,
}

impl HistogramKind {
    /// All histogram kinds.
    pub const ALL: [Self; 4] = [
        Self::IntCounter,
        Self::FloatCounter,
        Self::IntGauge,
        Self::FloatGauge,
    ];

    /// Returns true for gauge histograms.
    #[must_use]
    pub const fn is_gauge(self) -> bool {
        matches!(self, Self::IntGauge | Self::FloatGauge)
    }

    /// Returns true for float histograms.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::FloatCounter | Self::FloatGauge)
    }
}

/// A synthetic metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricProfile {
    /// Float samples following a sine wave.
    SineWave,
    /// Native histograms.
    Histogram(HistogramKind),
}

impl MetricProfile {
    /// All profiles, floats first.
    pub const ALL: [Self; 5] = [
        Self::SineWave,
        Self::Histogram(HistogramKind::IntCounter),
        Self::Histogram(HistogramKind::FloatCounter),
        Self::Histogram(HistogramKind::IntGauge),
        Self::Histogram(HistogramKind::FloatGauge),
    ];

    /// Name of the metric written for this profile.
    #[must_use]
    pub const fn metric_name(self) -> &'static str {
        match self {
            Self::SineWave => "canary_sine_wave",
            Self::Histogram(HistogramKind::IntCounter) => "canary_histogram_int_counter",
            Self::Histogram(HistogramKind::FloatCounter) => "canary_histogram_float_counter",
            Self::Histogram(HistogramKind::IntGauge) => "canary_histogram_int_gauge",
            Self::Histogram(HistogramKind::FloatGauge) => "canary_histogram_float_gauge",
        }
    }

    /// Value of the `type` label on this profile's metrics.
    #[must_use]
    pub const fn type_label(self) -> &'static str {
        match self {
            Self::SineWave => "float",
            Self::Histogram(HistogramKind::IntCounter) => "histogram_int_counter",
            Self::Histogram(HistogramKind::FloatCounter) => "histogram_float_counter",
            Self::Histogram(HistogramKind::IntGauge) => "histogram_int_gauge",
            Self::Histogram(HistogramKind::FloatGauge) => "histogram_float_gauge",
        }
    }

    /// Builds the aggregate query summing every series of `metric`.
    ///
    /// Floats go through `max_over_time(...[1s])` so only the points we wrote
    /// are picked up and the lookback period cannot fill gaps.
    #[must_use]
    pub fn query_sum(self, metric: &str) -> String {
        match self {
            Self::SineWave => format!("sum(max_over_time({metric}[1s]))"),
            Self::Histogram(_) => format!("sum({metric})"),
        }
    }

    /// Expected value of a single series at `ts`.
    #[must_use]
    pub fn value(self, ts: Timestamp) -> f64 {
        match self {
            Self::SineWave => sine_wave_value(ts),
            Self::Histogram(kind) if kind.is_float() => {
                histogram_sum(histogram_float_value(ts, kind.is_gauge()))
            }
            #[allow(clippy::cast_precision_loss)]
            Self::Histogram(kind) => histogram_sum(histogram_int_value(ts, kind.is_gauge()) as f64),
        }
    }

    /// Generates the histogram written at `ts`, or `None` for float profiles.
    #[must_use]
    pub fn histogram(self, ts: Timestamp) -> Option<Histogram> {
        match self {
            Self::SineWave => None,
            Self::Histogram(kind) if kind.is_float() => Some(float_histogram(
                histogram_float_value(ts, kind.is_gauge()),
                kind.is_gauge(),
                ts,
            )),
            Self::Histogram(kind) => Some(int_histogram(
                histogram_int_value(ts, kind.is_gauge()),
                kind.is_gauge(),
                ts,
            )),
        }
    }

    /// The histogram at `ts` as a query would return it for a single series.
    #[must_use]
    pub fn sample_histogram(self, ts: Timestamp) -> Option<SampleHistogram> {
        self.histogram(ts).map(|h| h.to_sample_histogram())
    }

    /// Generates `num_series` series named `name`, all carrying the point at `ts`.
    #[must_use]
    pub fn series(self, name: &str, ts: Timestamp, num_series: usize) -> Vec<TimeSeries> {
        let sample = match self {
            Self::SineWave => Some(Sample {
                value: sine_wave_value(ts),
                timestamp: ts,
            }),
            Self::Histogram(_) => None,
        };
        let histogram = self.histogram(ts);

        (0..num_series)
            .map(|id| TimeSeries {
                labels: vec![
                    Label::new(METRIC_NAME_LABEL, name),
                    Label::new(SERIES_ID_LABEL, id.to_string()),
                ],
                samples: sample.into_iter().collect(),
                histograms: histogram.iter().cloned().collect(),
            })
            .collect()
    }
}

impl std::fmt::Display for MetricProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_label())
    }
}

/// The set of profiles a test run exercises, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRegistry {
    profiles: Vec<MetricProfile>,
}

impl ProfileRegistry {
    /// Builds a registry with the float profile and/or every histogram profile.
    #[must_use]
    pub fn new(with_floats: bool, with_histograms: bool) -> Self {
        let profiles = MetricProfile::ALL
            .into_iter()
            .filter(|p| match p {
                MetricProfile::SineWave => with_floats,
                MetricProfile::Histogram(_) => with_histograms,
            })
            .collect();
        Self { profiles }
    }

    /// Builds a registry from the test configuration.
    #[must_use]
    pub fn from_config(config: &WriteReadSeriesConfig) -> Self {
        Self::new(config.with_floats, config.with_histograms)
    }

    /// Returns the enabled profiles.
    #[must_use]
    pub fn profiles(&self) -> &[MetricProfile] {
        &self.profiles
    }

    /// Returns the number of enabled profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true if no profile is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn sine_wave_value(ts: Timestamp) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let radians = 2.0 * PI * ts as f64 / duration_ms(SINE_WAVE_PERIOD) as f64;
    radians.sin()
}

fn histogram_int_value(ts: Timestamp, gauge: bool) -> i64 {
    let secs = ts.div_euclid(1_000);
    let minute = secs.div_euclid(60);
    if gauge && minute % 2 == 0 {
        -secs
    } else {
        secs
    }
}

fn histogram_float_value(ts: Timestamp, gauge: bool) -> f64 {
    let secs = ts.div_euclid(1_000);
    let minute = secs.div_euclid(60);
    #[allow(clippy::cast_precision_loss)]
    let value = secs as f64 / HISTOGRAM_FLOAT_DIVISOR;
    if gauge && minute % 2 == 0 {
        -value
    } else {
        value
    }
}

const fn reset_hint(gauge: bool) -> ResetHint {
    if gauge {
        ResetHint::Gauge
    } else {
        ResetHint::Unknown
    }
}

/// Integer histogram; the sign of `value` picks the populated side.
fn int_histogram(value: i64, gauge: bool, ts: Timestamp) -> Histogram {
    let magnitude = value.saturating_abs();
    let populated = vec![magnitude, 0, 0, 0];
    let empty = vec![0, 0, 0, 0];
    let (positive, negative) = if value >= 0 {
        (populated, empty)
    } else {
        (empty, populated)
    };

    #[allow(clippy::cast_precision_loss)]
    let sum = histogram_sum(value as f64);
    Histogram {
        count: HistogramCount::Int(magnitude.unsigned_abs().saturating_mul(4)),
        sum,
        schema: HISTOGRAM_SCHEMA,
        zero_threshold: HISTOGRAM_ZERO_THRESHOLD,
        zero_count: HistogramCount::Int(0),
        negative_spans: HISTOGRAM_SPANS.to_vec(),
        negative_buckets: Buckets::Deltas(negative),
        positive_spans: HISTOGRAM_SPANS.to_vec(),
        positive_buckets: Buckets::Deltas(positive),
        reset_hint: reset_hint(gauge),
        timestamp: ts,
    }
}

/// Float histogram; the sign of `value` picks the populated side.
fn float_histogram(value: f64, gauge: bool, ts: Timestamp) -> Histogram {
    let magnitude = value.abs();
    let populated = vec![magnitude; 4];
    let empty = vec![0.0; 4];
    let (positive, negative) = if value >= 0.0 {
        (populated, empty)
    } else {
        (empty, populated)
    };

    Histogram {
        count: HistogramCount::Float(magnitude * 4.0),
        sum: histogram_sum(value),
        schema: HISTOGRAM_SCHEMA,
        zero_threshold: HISTOGRAM_ZERO_THRESHOLD,
        zero_count: HistogramCount::Float(0.0),
        negative_spans: HISTOGRAM_SPANS.to_vec(),
        negative_buckets: Buckets::Counts(negative),
        positive_spans: HISTOGRAM_SPANS.to_vec(),
        positive_buckets: Buckets::Counts(positive),
        reset_hint: reset_hint(gauge),
        timestamp: ts,
    }
}
