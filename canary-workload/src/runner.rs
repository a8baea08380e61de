//! Periodic test runner.
//!
//! Every test is initialized once, then run once per run interval until the
//! shutdown channel fires or the requested number of iterations is reached.
//! A failed run is logged and counted; the next run starts on schedule.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TestError;
use crate::model::{duration_ms, Timestamp};

/// A test run periodically against the store.
#[async_trait]
pub trait ContinuousTest: Send {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Prepares the test, e.g. by recovering state from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the test cannot start.
    async fn init(&mut self, now: Timestamp) -> Result<(), TestError>;

    /// Runs the test once.
    ///
    /// # Errors
    ///
    /// Returns every failure of the run, or `TestError::Cancelled`.
    async fn run(&mut self, now: Timestamp) -> Result<(), TestError>;
}

/// Source of "now" for the runner.
pub trait Clock: Send {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now(&mut self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&mut self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, duration_ms)
    }
}

/// A simulated clock that moves forward by a fixed step on every reading
/// after the first.
#[derive(Debug, Clone, Copy)]
pub struct SteppingClock {
    next: Timestamp,
    step: Timestamp,
}

impl SteppingClock {
    /// Creates a clock reading `start`, then `start + step`, and so on.
    #[must_use]
    pub fn new(start: Timestamp, step: Duration) -> Self {
        Self {
            next: start,
            step: duration_ms(step),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&mut self) -> Timestamp {
        let now = self.next;
        self.next += self.step;
        now
    }
}

/// Outcome counts of a runner session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Test runs completed, failed or not.
    pub runs: u64,
    /// Test runs that returned an error.
    pub failed_runs: u64,
}

/// Drives a set of continuous tests.
pub struct Runner {
    tests: Vec<Box<dyn ContinuousTest>>,
    run_interval: Duration,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("tests", &self.tests.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("run_interval", &self.run_interval)
            .finish()
    }
}

impl Runner {
    /// Creates a runner invoking its tests every `run_interval`.
    #[must_use]
    pub const fn new(run_interval: Duration) -> Self {
        Self {
            tests: Vec::new(),
            run_interval,
        }
    }

    /// Adds a test.
    pub fn add_test(&mut self, test: Box<dyn ContinuousTest>) {
        self.tests.push(test);
    }

    /// Returns the number of registered tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if no test is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Runs the tests until `shutdown_rx` fires or, if set, `iterations`
    /// rounds have completed.
    ///
    /// The first round starts immediately. A shutdown drops the
    /// initialization or round in progress, cancelling its in-flight calls.
    ///
    /// # Errors
    ///
    /// Returns the first `init` failure other than cancellation; no test is
    /// run in that case.
    pub async fn run<K: Clock>(
        &mut self,
        clock: &mut K,
        mut shutdown_rx: mpsc::Receiver<()>,
        iterations: Option<u64>,
    ) -> Result<RunnerStats, TestError> {
        let now = clock.now();
        let initialized = tokio::select! {
            _ = shutdown_rx.recv() => None,
            result = init_all(&mut self.tests, now) => Some(result),
        };
        match initialized {
            None => {
                debug!("Runner shutting down during initialization");
                return Ok(RunnerStats::default());
            }
            Some(Err(e)) if e.is_cancelled() => {
                info!("Initialization cancelled");
                return Ok(RunnerStats::default());
            }
            Some(result) => result?,
        }

        let mut stats = RunnerStats::default();
        let mut interval = tokio::time::interval(self.run_interval);
        let mut round = 0_u64;

        loop {
            if iterations.is_some_and(|max| round >= max) {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Runner shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            let now = clock.now();
            let tests = &mut self.tests;
            let cancelled = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Runner shutting down, abandoning the current round");
                    true
                }
                cancelled = run_round(tests, now, &mut stats) => cancelled,
            };
            if cancelled {
                break;
            }
            round += 1;
        }

        info!(runs = stats.runs, failed_runs = stats.failed_runs, "Runner stopped");
        Ok(stats)
    }
}

async fn init_all(tests: &mut [Box<dyn ContinuousTest>], now: Timestamp) -> Result<(), TestError> {
    for test in tests {
        info!(test = test.name(), "Initializing test");
        test.init(now).await?;
    }
    Ok(())
}

/// Runs every test once. Returns true if a test was cancelled.
async fn run_round(
    tests: &mut [Box<dyn ContinuousTest>],
    now: Timestamp,
    stats: &mut RunnerStats,
) -> bool {
    for test in tests {
        let name = test.name().to_string();
        debug!(test = %name, now, "Running test");

        match test.run(now).await {
            Ok(()) => {
                stats.runs += 1;
                metrics::counter!("canary_test_runs_total", "test" => name.clone()).increment(1);
                info!(test = %name, "Test run succeeded");
            }
            Err(e) if e.is_cancelled() => {
                info!(test = %name, "Test run cancelled");
                return true;
            }
            Err(e) => {
                stats.runs += 1;
                stats.failed_runs += 1;
                metrics::counter!("canary_test_runs_total", "test" => name.clone()).increment(1);
                metrics::counter!("canary_test_runs_failed_total", "test" => name.clone())
                    .increment(1);
                warn!(test = %name, error = %e, "Test run failed");
            }
        }
    }
    false
}
