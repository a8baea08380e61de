//! End-to-end tests for the write/read series test.
//!
//! Every test drives the full write -> query -> verify path against the
//! in-memory simulated store. Time is paused so the write rate limiter
//! advances instantly.

use std::sync::Arc;
use std::time::Duration;

use canary_workload::{
    compare_sample_values, ClientError, ContinuousTest, HistogramKind, MetricProfile, QueryOptions,
    QueryRange, RetryingClient, Runner, RunnerStats, SimulatedStore, SteppingClock, StoreClient,
    TestError, Timestamp, WriteReadSeriesConfig, WriteReadSeriesTest,
};
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

// 2024-01-01T00:00:00Z.
const NOW: Timestamp = 1_704_067_200_000;
const MINUTE_MS: i64 = 60_000;

fn floats(num_series: usize) -> WriteReadSeriesConfig {
    WriteReadSeriesConfig {
        num_series,
        with_floats: true,
        ..WriteReadSeriesConfig::default()
    }
}

fn histograms(num_series: usize) -> WriteReadSeriesConfig {
    WriteReadSeriesConfig {
        num_series,
        with_histograms: true,
        ..WriteReadSeriesConfig::default()
    }
}

fn new_test(
    store: &Arc<SimulatedStore>,
    config: WriteReadSeriesConfig,
) -> WriteReadSeriesTest<RetryingClient<Arc<SimulatedStore>>> {
    WriteReadSeriesTest::new(RetryingClient::new(Arc::clone(store), 3), config, Some(42))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_written_series_sum_back() {
    let store = Arc::new(SimulatedStore::new());
    let mut test = new_test(&store, floats(10));
    // A fifth of the sine period, away from the zero crossing.
    let t0 = NOW + 2 * MINUTE_MS;

    test.init(t0).await.unwrap();
    test.run(t0).await.unwrap();

    let vector = store
        .query(
            "sum(max_over_time(canary_sine_wave[1s]))",
            t0,
            QueryOptions::UNCACHED,
        )
        .await
        .unwrap();
    assert_eq!(vector.len(), 1);
    let v = MetricProfile::SineWave.value(t0);
    assert!(v > 0.9);
    assert!(compare_sample_values(vector[0].value, 10.0 * v));
    assert_eq!(store.series_count("canary_sine_wave"), 10);
}

#[tokio::test(start_paused = true)]
async fn test_runs_catch_up_and_verify() {
    let store = Arc::new(SimulatedStore::new());
    let mut test = new_test(&store, floats(10));

    test.init(NOW).await.unwrap();
    for run in 0..4 {
        test.run(NOW + run * 5 * MINUTE_MS).await.unwrap();
    }

    let history = test.history(MetricProfile::SineWave).unwrap();
    assert_eq!(history.last_written(), Some(NOW + 15 * MINUTE_MS));
    assert_eq!(
        history.query_range(),
        Some(QueryRange {
            min: NOW,
            max: NOW + 15 * MINUTE_MS
        })
    );
    // One point per write interval: 15 minutes at 20s plus the first one.
    assert_eq!(test.metrics().snapshot().writes_total, 46);
    assert_eq!(test.metrics().snapshot().checks_failed_total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_recovers_history() {
    let store = Arc::new(SimulatedStore::new());
    let mut first = new_test(&store, floats(10));
    first.init(NOW).await.unwrap();
    first.run(NOW).await.unwrap();
    first.run(NOW + 5 * MINUTE_MS).await.unwrap();
    first.run(NOW + 10 * MINUTE_MS).await.unwrap();

    let restart = NOW + 10 * MINUTE_MS + 30_000;
    let mut second = new_test(&store, floats(10));
    second.init(restart).await.unwrap();

    let history = second.history(MetricProfile::SineWave).unwrap();
    assert_eq!(history.last_written(), Some(NOW + 10 * MINUTE_MS));
    assert_eq!(
        history.query_range(),
        Some(QueryRange {
            min: NOW,
            max: NOW + 10 * MINUTE_MS
        })
    );

    // Writing resumes right after the recovered point.
    let writes_before = store.write_calls();
    second.run(NOW + 15 * MINUTE_MS).await.unwrap();
    assert_eq!(store.write_calls() - writes_before, 14);
}

#[tokio::test(start_paused = true)]
async fn test_histogram_profiles_verify_and_recover() {
    let store = Arc::new(SimulatedStore::new());
    let mut first = new_test(&store, histograms(5));
    first.init(NOW).await.unwrap();
    first.run(NOW).await.unwrap();
    first.run(NOW + 5 * MINUTE_MS).await.unwrap();
    assert!(first.history(MetricProfile::SineWave).is_none());

    let snapshot = first.metrics().snapshot();
    assert!(snapshot.checks_total > 0);
    assert_eq!(snapshot.checks_failed_total, 0);

    // Restart on the last written point: `sum()` would otherwise fill the
    // following steps from the lookback window.
    let mut second = new_test(&store, histograms(5));
    second.init(NOW + 5 * MINUTE_MS).await.unwrap();
    for kind in HistogramKind::ALL {
        let history = second.history(MetricProfile::Histogram(kind)).unwrap();
        assert_eq!(
            history.query_range(),
            Some(QueryRange {
                min: NOW,
                max: NOW + 5 * MINUTE_MS
            }),
            "{kind:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_write_failures_are_retried() {
    let store = Arc::new(SimulatedStore::new());
    let mut test = new_test(&store, floats(2));
    store.fail_next_writes([
        ClientError::Transport("connection reset".to_string()),
        ClientError::status(502, "bad gateway"),
    ]);

    test.run(NOW).await.unwrap();

    assert_eq!(store.write_calls(), 3);
    assert_eq!(
        test.history(MetricProfile::SineWave).unwrap().last_written(),
        Some(NOW)
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_run() {
    let store = Arc::new(SimulatedStore::new());
    let mut test = new_test(&store, floats(2));
    test.run(NOW).await.unwrap();

    store.fail_next_writes(std::iter::repeat(ClientError::status(503, "unavailable")).take(3));
    let err = test.run(NOW + MINUTE_MS).await.unwrap_err();

    assert!(matches!(err, TestError::Multiple(_)));
    assert!(err.to_string().contains("failed to remote write series"));
    // The queryable range is untouched, so the run still verified it.
    let history = test.history(MetricProfile::SineWave).unwrap();
    assert_eq!(history.last_written(), Some(NOW));
    assert_eq!(test.metrics().snapshot().checks_failed_total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queries_run_with_and_without_cache() {
    let store = Arc::new(SimulatedStore::new());
    let mut test = new_test(&store, histograms(3));
    test.run(NOW).await.unwrap();
    test.run(NOW + 5 * MINUTE_MS).await.unwrap();

    let queries = store.query_calls();
    assert!(queries > 0);
    assert_eq!(store.uncached_query_calls() * 2, queries);
}

#[tokio::test(start_paused = true)]
async fn test_runner_drives_the_test() {
    let store = Arc::new(SimulatedStore::new());
    let mut runner = Runner::new(Duration::from_millis(100));
    runner.add_test(Box::new(new_test(&store, floats(3))));

    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let mut clock = SteppingClock::new(NOW, Duration::from_secs(300));
    let stats = runner.run(&mut clock, shutdown_rx, Some(3)).await.unwrap();

    assert_eq!(stats, RunnerStats { runs: 3, failed_runs: 0 });
    // init at NOW, then runs at NOW + 5m, 10m and 15m.
    assert_eq!(store.write_calls(), 1 + 2 * 15);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_the_runner() {
    let store = Arc::new(SimulatedStore::new());
    store.fail_next_writes([ClientError::Cancelled]);

    let mut runner = Runner::new(Duration::from_millis(100));
    runner.add_test(Box::new(new_test(&store, floats(3))));

    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let mut clock = SteppingClock::new(NOW, Duration::from_secs(300));
    let stats = runner.run(&mut clock, shutdown_rx, Some(3)).await.unwrap();

    assert_eq!(stats, RunnerStats::default());
    assert_eq!(store.write_calls(), 1);
}
