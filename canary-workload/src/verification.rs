//! Verification of aggregate query results.
//!
//! A canary query sums every synthetic series of a profile, so each returned
//! point must equal the per-series value times the number of series. Points
//! are checked from newest to oldest and must be exactly one step apart:
//! - Value mismatch (corrupted or partially written data)
//! - Timestamp gap (missing or misaligned points)
//! - Result shape (wrong number of series, mixed or missing point types)

use std::fmt;
use std::time::Duration;

use crate::model::{duration_ms, SampleStream, Timestamp};

/// Tolerance of the value comparison.
pub const MAX_COMPARISON_DELTA: f64 = 0.001;

/// Kind of point a violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    /// Float sample.
    Sample,
    /// Histogram sample.
    Histogram,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample => f.write_str("sample"),
            Self::Histogram => f.write_str("histogram"),
        }
    }
}

/// A query result that does not match what was written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    /// The aggregation returned other than exactly one series.
    #[error("expected 1 series in the result but got {0}")]
    UnexpectedSeriesCount(usize),

    /// The series holds both floats and histograms.
    #[error("expected only floats or histograms in the result but got both")]
    MixedSampleTypes,

    /// The series holds no points at all.
    #[error("expected either floats or histograms in the result but got neither")]
    EmptyResult,

    /// A point does not carry the expected aggregate value.
    #[error("{kind} at timestamp {timestamp} has value {actual} while was expecting {expected}")]
    ValueMismatch {
        /// Point kind.
        kind: PointKind,
        /// Point timestamp.
        timestamp: Timestamp,
        /// Returned value.
        actual: f64,
        /// Expected value.
        expected: f64,
    },

    /// Two adjacent points are not exactly one step apart.
    #[error(
        "{kind} at timestamp {timestamp} was expected to have timestamp {expected_timestamp} \
         because next {kind} has timestamp {next_timestamp}"
    )]
    TimestampGap {
        /// Point kind.
        kind: PointKind,
        /// Timestamp of the misplaced point.
        timestamp: Timestamp,
        /// Where the point should have been.
        expected_timestamp: Timestamp,
        /// Timestamp of the newer neighbour.
        next_timestamp: Timestamp,
    },
}

/// Compares a returned value against the expected one.
///
/// The difference is scaled by the delta and compared against the delta
/// again, which bounds the absolute error by `delta²`.
#[must_use]
pub fn compare_sample_values(actual: f64, expected: f64) -> bool {
    let delta = ((actual - expected) / MAX_COMPARISON_DELTA).abs();
    delta < MAX_COMPARISON_DELTA
}

/// Verifies that `matrix` is the sum of `expected_series` series generated
/// by `value_fn`, with points `expected_step` apart.
///
/// Returns the index of the oldest point such that it and every newer point
/// verify (`None` if not even the newest does), together with the first
/// violation found walking backwards.
pub fn verify_samples_sum(
    matrix: &[SampleStream],
    expected_series: usize,
    expected_step: Duration,
    value_fn: impl Fn(Timestamp) -> f64,
) -> (Option<usize>, Result<(), VerifyError>) {
    if matrix.len() != 1 {
        return (None, Err(VerifyError::UnexpectedSeriesCount(matrix.len())));
    }

    let stream = &matrix[0];
    let (kind, points): (PointKind, Vec<(Timestamp, f64)>) =
        match (stream.values.is_empty(), stream.histograms.is_empty()) {
            (false, false) => return (None, Err(VerifyError::MixedSampleTypes)),
            (true, true) => return (None, Err(VerifyError::EmptyResult)),
            (false, true) => (
                PointKind::Sample,
                stream.values.iter().map(|p| (p.timestamp, p.value)).collect(),
            ),
            (true, false) => (
                PointKind::Histogram,
                stream
                    .histograms
                    .iter()
                    .map(|p| (p.timestamp, p.histogram.sum))
                    .collect(),
            ),
        };

    #[allow(clippy::cast_precision_loss)]
    let series = expected_series as f64;
    let step_ms = duration_ms(expected_step);
    let mut oldest_match = None;

    for idx in (0..points.len()).rev() {
        let (timestamp, actual) = points[idx];

        let expected = value_fn(timestamp) * series;
        if !compare_sample_values(actual, expected) {
            return (
                oldest_match,
                Err(VerifyError::ValueMismatch {
                    kind,
                    timestamp,
                    actual,
                    expected,
                }),
            );
        }

        if let Some(&(next_timestamp, _)) = points.get(idx + 1) {
            let expected_timestamp = next_timestamp - step_ms;
            if timestamp != expected_timestamp {
                return (
                    oldest_match,
                    Err(VerifyError::TimestampGap {
                        kind,
                        timestamp,
                        expected_timestamp,
                        next_timestamp,
                    }),
                );
            }
        }

        oldest_match = Some(idx);
    }

    (oldest_match, Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Matrix, SampleHistogram, SampleHistogramPair, SamplePair};

    const STEP: Duration = Duration::from_secs(20);

    fn value_fn(ts: Timestamp) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let v = ts as f64 / 1_000.0;
        v
    }

    fn float_matrix(series: usize, timestamps: &[Timestamp]) -> Matrix {
        #[allow(clippy::cast_precision_loss)]
        let values = timestamps
            .iter()
            .map(|&ts| SamplePair {
                timestamp: ts,
                value: value_fn(ts) * series as f64,
            })
            .collect();
        vec![SampleStream {
            values,
            ..SampleStream::default()
        }]
    }

    #[test]
    fn test_tolerance_boundary() {
        let delta = MAX_COMPARISON_DELTA;
        let expected = 0.9;
        assert!(compare_sample_values(expected * (1.0 + delta * delta), expected));
        assert!(compare_sample_values(expected * (1.0 - delta * delta), expected));
        assert!(!compare_sample_values(1.0 + 2.0 * delta, 1.0));
        assert!(!compare_sample_values(1.0 - 2.0 * delta, 1.0));
    }

    #[test]
    fn test_all_points_match() {
        let matrix = float_matrix(10, &[20_000, 40_000, 60_000]);
        let (oldest, result) = verify_samples_sum(&matrix, 10, STEP, value_fn);
        assert_eq!(oldest, Some(0));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_gap_detected_after_missing_point() {
        // t, t+step, t+3*step: t+2*step is missing.
        let matrix = float_matrix(1, &[20_000, 40_000, 80_000]);
        let (oldest, result) = verify_samples_sum(&matrix, 1, STEP, value_fn);

        assert_eq!(oldest, Some(2));
        assert_eq!(
            result,
            Err(VerifyError::TimestampGap {
                kind: PointKind::Sample,
                timestamp: 40_000,
                expected_timestamp: 60_000,
                next_timestamp: 80_000,
            })
        );
    }

    #[test]
    fn test_value_mismatch_reports_oldest_match() {
        let mut matrix = float_matrix(2, &[20_000, 40_000, 60_000]);
        matrix[0].values[0].value += 1.0;

        let (oldest, result) = verify_samples_sum(&matrix, 2, STEP, value_fn);
        assert_eq!(oldest, Some(1));
        assert!(matches!(
            result,
            Err(VerifyError::ValueMismatch {
                timestamp: 20_000,
                ..
            })
        ));
    }

    #[test]
    fn test_newest_point_mismatch_matches_nothing() {
        let mut matrix = float_matrix(1, &[20_000]);
        matrix[0].values[0].value = -5.0;

        let (oldest, result) = verify_samples_sum(&matrix, 1, STEP, value_fn);
        assert_eq!(oldest, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_series_count() {
        let mut matrix = float_matrix(1, &[20_000]);
        matrix.push(matrix[0].clone());
        let (oldest, result) = verify_samples_sum(&matrix, 1, STEP, value_fn);
        assert_eq!(oldest, None);
        assert_eq!(result, Err(VerifyError::UnexpectedSeriesCount(2)));

        let (_, result) = verify_samples_sum(&[], 1, STEP, value_fn);
        assert_eq!(result, Err(VerifyError::UnexpectedSeriesCount(0)));
    }

    #[test]
    fn test_mixed_and_empty_results() {
        let mut matrix = float_matrix(1, &[20_000]);
        matrix[0].histograms.push(SampleHistogramPair {
            timestamp: 20_000,
            histogram: SampleHistogram::default(),
        });
        let (_, result) = verify_samples_sum(&matrix, 1, STEP, value_fn);
        assert_eq!(result, Err(VerifyError::MixedSampleTypes));

        let empty = vec![SampleStream::default()];
        let (_, result) = verify_samples_sum(&empty, 1, STEP, value_fn);
        assert_eq!(result, Err(VerifyError::EmptyResult));
    }

    #[test]
    fn test_histograms_checked_on_sum() {
        let histograms = [20_000, 40_000]
            .iter()
            .map(|&ts| SampleHistogramPair {
                timestamp: ts,
                histogram: SampleHistogram {
                    count: 1.0,
                    sum: value_fn(ts) * 3.0,
                    buckets: vec![],
                },
            })
            .collect();
        let matrix = vec![SampleStream {
            histograms,
            ..SampleStream::default()
        }];

        let (oldest, result) = verify_samples_sum(&matrix, 3, STEP, value_fn);
        assert_eq!(oldest, Some(0));
        assert_eq!(result, Ok(()));

        let (oldest, result) = verify_samples_sum(&matrix, 4, STEP, value_fn);
        assert_eq!(oldest, None);
        assert!(matches!(
            result,
            Err(VerifyError::ValueMismatch {
                kind: PointKind::Histogram,
                timestamp: 40_000,
                ..
            })
        ));
    }
}
