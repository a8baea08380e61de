//! Recovery of the write/read history after a restart.
//!
//! Previously written data is located by querying backwards from now, one
//! day-sized window at a time, and verifying the accumulated points from
//! newest to oldest. The scan stops at the first point that does not verify
//! or at the first window that does not start exactly where the previous one
//! ended. A failed query ends the scan with what was found so far: at worst
//! the test starts over with an empty history. Only cancellation is
//! reported as an error.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::client::{ClientError, QueryOptions, StoreClient};
use crate::error::TestError;
use crate::history::WriteReadHistory;
use crate::model::{align_to_interval, duration_ms, SampleStream, Timestamp};
use crate::profile::MetricProfile;
use crate::verification::verify_samples_sum;
use crate::write_read::{WRITE_INTERVAL, WRITE_MAX_AGE};

/// Span of a single recovery query.
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Scans backwards for the range of verifiable points written for `profile`.
///
/// Returns `(from, to)`, the oldest and newest timestamps of the contiguous
/// verifiable run ending at the newest point found, or `None` if nothing
/// verifiable was found.
///
/// # Errors
///
/// Returns `TestError::Cancelled` if a query was cancelled.
pub async fn find_previously_written_time_range<C: StoreClient + ?Sized>(
    client: &C,
    profile: MetricProfile,
    now: Timestamp,
    num_series: usize,
    max_query_age: Duration,
) -> Result<Option<(Timestamp, Timestamp)>, TestError> {
    let metric = profile.metric_name();
    let query = profile.query_sum(metric);
    let step = WRITE_INTERVAL;
    let step_ms = duration_ms(step);
    let oldest_allowed = now.saturating_sub(duration_ms(max_query_age));

    let mut end = align_to_interval(now, step);
    let mut found = None;
    let mut acc = SampleStream::default();

    loop {
        let start = align_to_interval(
            oldest_allowed.max(end - duration_ms(RECOVERY_WINDOW) + step_ms),
            step,
        );
        if start >= end {
            // Max query age reached.
            return Ok(found);
        }

        debug!(metric, query = %query, start, end, step = ?step, "Querying previously written samples");

        let matrix = match client
            .query_range(&query, start, end, step, QueryOptions::UNCACHED)
            .await
        {
            Ok(matrix) => matrix,
            Err(ClientError::Cancelled) => return Err(TestError::Cancelled),
            Err(e) => {
                warn!(metric, query = %query, start, end, error = %e, "Failed to query previously written samples");
                return Ok(found);
            }
        };

        if matrix.is_empty() {
            return Ok(found);
        }
        if matrix.len() != 1 {
            error!(
                metric,
                query = %query,
                expected = 1,
                returned = matrix.len(),
                "Recovery query returned an unexpected number of series"
            );
            return Ok(found);
        }

        let Some(mut window) = matrix.into_iter().next() else {
            return Ok(found);
        };
        window.values.append(&mut acc.values);
        window.histograms.append(&mut acc.histograms);
        acc.values = window.values;
        acc.histograms = window.histograms;

        if acc.values.is_empty() == acc.histograms.is_empty() {
            error!(
                metric,
                query = %query,
                "Recovery query returned either both floats and histograms or neither"
            );
            return Ok(found);
        }
        let timestamps: Vec<Timestamp> = if acc.histograms.is_empty() {
            acc.values.iter().map(|p| p.timestamp).collect()
        } else {
            acc.histograms.iter().map(|p| p.timestamp).collect()
        };

        let (oldest_match, _) =
            verify_samples_sum(std::slice::from_ref(&acc), num_series, step, |ts| profile.value(ts));
        let Some(oldest_match) = oldest_match else {
            return Ok(found);
        };

        let newest = timestamps[timestamps.len() - 1];
        found = Some((timestamps[oldest_match], newest));

        // The oldest verifiable point lies inside this window.
        if oldest_match != 0 || timestamps[0] != start {
            return Ok(found);
        }
        end = start - step_ms;
    }
}

/// Rebuilds the history of `profile` from what the store holds.
///
/// A range whose newest point is older than [`WRITE_MAX_AGE`] is discarded:
/// resuming from it would mean backfilling too far into the past.
///
/// # Errors
///
/// Returns `TestError::Cancelled` if the scan was cancelled.
pub async fn recover<C: StoreClient + ?Sized>(
    client: &C,
    profile: MetricProfile,
    now: Timestamp,
    num_series: usize,
    max_query_age: Duration,
) -> Result<WriteReadHistory, TestError> {
    let metric = profile.metric_name();
    let Some((from, to)) =
        find_previously_written_time_range(client, profile, now, num_series, max_query_age).await?
    else {
        info!(metric, "No previously written samples found, writing from the nearest aligned timestamp");
        return Ok(WriteReadHistory::new());
    };

    if to < now - duration_ms(WRITE_MAX_AGE) {
        info!(metric, last_sample_timestamp = to, "Previously written samples are too old to recover");
        return Ok(WriteReadHistory::new());
    }

    info!(
        metric,
        last_written = to,
        query_min = from,
        query_max = to,
        "Recovered writes and reads from previously written samples"
    );
    Ok(WriteReadHistory::recovered(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::QueryRange;
    use crate::simulated::SimulatedStore;

    // 2024-01-01T00:00:00Z.
    const NOW: Timestamp = 1_704_067_200_000;
    const HOUR_MS: i64 = 3_600_000;
    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);
    const STEP_MS: i64 = 20_000;

    async fn write_range(store: &SimulatedStore, profile: MetricProfile, from: Timestamp, to: Timestamp) {
        let mut ts = from;
        while ts <= to {
            store
                .write_series(&profile.series(profile.metric_name(), ts, 2))
                .await
                .unwrap();
            ts += STEP_MS;
        }
    }

    #[tokio::test]
    async fn test_recovers_history_after_gap() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;

        // An old run, a missing hour, then 3h of valid history up to now - 5m.
        write_range(&store, profile, NOW - 6 * HOUR_MS, NOW - 4 * HOUR_MS).await;
        let from = NOW - 3 * HOUR_MS - 5 * 60_000;
        let to = NOW - 5 * 60_000;
        write_range(&store, profile, from, to).await;

        let range = find_previously_written_time_range(&store, profile, NOW, 2, WEEK).await.unwrap();
        assert_eq!(range, Some((from, to)));

        let history = recover(&store, profile, NOW, 2, WEEK).await.unwrap();
        assert_eq!(history.last_written(), Some(to));
        assert_eq!(history.query_range(), Some(QueryRange { min: from, max: to }));
    }

    #[tokio::test]
    async fn test_recovery_stops_at_single_missing_interval() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;

        let missing = NOW - 2 * HOUR_MS;
        let to = NOW - 5 * 60_000;
        write_range(&store, profile, NOW - 4 * HOUR_MS, missing - STEP_MS).await;
        write_range(&store, profile, missing + STEP_MS, to).await;

        let range = find_previously_written_time_range(&store, profile, NOW, 2, WEEK).await.unwrap();
        assert_eq!(range, Some((missing + STEP_MS, to)));
    }

    #[tokio::test]
    async fn test_recovery_spans_multiple_windows() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::Histogram(crate::profile::HistogramKind::IntGauge);

        let from = NOW - 30 * HOUR_MS;
        write_range(&store, profile, from, NOW).await;

        let range = find_previously_written_time_range(&store, profile, NOW, 2, WEEK).await.unwrap();
        assert_eq!(range, Some((from, NOW)));
    }

    #[tokio::test]
    async fn test_recovery_honors_max_query_age() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;
        write_range(&store, profile, NOW - 3 * HOUR_MS, NOW).await;

        let range =
            find_previously_written_time_range(&store, profile, NOW, 2, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(range, Some((NOW - HOUR_MS, NOW)));
    }

    #[tokio::test]
    async fn test_recovery_stops_at_corrupted_point() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;
        write_range(&store, profile, NOW - HOUR_MS, NOW).await;

        // Series count mismatch: the store holds 2 series, 3 are expected.
        let range = find_previously_written_time_range(&store, profile, NOW, 3, WEEK).await.unwrap();
        assert_eq!(range, None);
    }

    #[tokio::test]
    async fn test_no_history() {
        let store = SimulatedStore::new();
        let history = recover(&store, MetricProfile::SineWave, NOW, 2, WEEK).await.unwrap();
        assert_eq!(history, WriteReadHistory::new());
    }

    #[tokio::test]
    async fn test_stale_history_discarded() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;
        write_range(&store, profile, NOW - 3 * HOUR_MS, NOW - 2 * HOUR_MS).await;

        let history = recover(&store, profile, NOW, 2, WEEK).await.unwrap();
        assert_eq!(history, WriteReadHistory::new());
    }

    #[tokio::test]
    async fn test_query_failure_degrades_to_no_history() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;
        write_range(&store, profile, NOW - HOUR_MS, NOW).await;
        store.fail_next_queries([ClientError::status(500, "internal")]);

        let history = recover(&store, profile, NOW, 2, WEEK).await.unwrap();
        assert_eq!(history, WriteReadHistory::new());
    }

    #[tokio::test]
    async fn test_cancelled_query_aborts_recovery() {
        let store = SimulatedStore::new();
        let profile = MetricProfile::SineWave;
        write_range(&store, profile, NOW - HOUR_MS, NOW).await;
        store.fail_next_queries([ClientError::Cancelled]);

        let result = recover(&store, profile, NOW, 2, WEEK).await;
        assert!(matches!(result, Err(TestError::Cancelled)));
    }
}
