//! Continuous write/read canary binary.
//!
//! Runs the write/read series test against the in-memory simulated store,
//! advancing a simulated clock by one run interval per iteration:
//!
//! ```bash
//! canary --with-floats --with-histograms --num-series 100 --iterations 12
//! ```
//!
//! Settings come from an optional TOML file, overridden by flags:
//!
//! ```bash
//! canary --config canary.toml --write-failure-rate 0.05 --log-level debug
//! ```
//!
//! Exits with a non-zero status if any run failed.
//!
//! Only the run schedule is simulated. Writes still go through the rate
//! limiter in real time, one batch per profile per second, so a run that
//! catches up a whole run interval takes about `run_interval / 20s` seconds
//! per enabled profile: roughly 75s per run with all five profiles at the
//! default 5 minute interval. Lower `--run-interval-secs` for faster runs.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use canary_workload::{
    CanaryConfig, Clock, ProfileRegistry, RetryingClient, Runner, SimulatedStore, SteppingClock,
    SystemClock, WriteReadSeriesTest, WRITE_INTERVAL,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Real time between two simulated runs.
const SIMULATED_PACE: Duration = Duration::from_millis(100);

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "canary")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of series written per profile at every write interval.
    #[arg(long)]
    num_series: Option<usize>,

    /// Write and verify the float sine wave profile.
    #[arg(long)]
    with_floats: bool,

    /// Write and verify the native histogram profiles.
    #[arg(long)]
    with_histograms: bool,

    /// Simulated seconds between two runs.
    #[arg(long)]
    run_interval_secs: Option<u64>,

    /// Number of runs before exiting.
    #[arg(long, default_value = "12")]
    iterations: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Fraction of writes the simulated store fails with a 503.
    #[arg(long, default_value = "0.0")]
    write_failure_rate: f64,
}

impl Args {
    fn load_config(&self) -> Result<CanaryConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => CanaryConfig::from_file(path)?,
            None => CanaryConfig::default(),
        };

        let test = &mut config.write_read_series;
        if let Some(num_series) = self.num_series {
            test.num_series = num_series;
        }
        test.with_floats |= self.with_floats;
        test.with_histograms |= self.with_histograms;
        if let Some(secs) = self.run_interval_secs {
            config.run_interval_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Canary failed");
            ExitCode::FAILURE
        }
    }
}

/// Runs the canary. Returns true if every run succeeded.
async fn run(args: &Args) -> Result<bool, Box<dyn std::error::Error>> {
    let config = args.load_config()?;
    let profiles = ProfileRegistry::from_config(&config.write_read_series).profiles().len();
    // Catching up one run interval costs one limiter second per batch.
    let batches_per_run = config.run_interval().as_secs() / WRITE_INTERVAL.as_secs();
    info!(
        num_series = config.write_read_series.num_series,
        with_floats = config.write_read_series.with_floats,
        with_histograms = config.write_read_series.with_histograms,
        run_interval_secs = config.run_interval_secs,
        iterations = args.iterations,
        write_failure_rate = args.write_failure_rate,
        estimated_run_secs = batches_per_run * profiles as u64,
        "Starting canary against the simulated store"
    );

    let mut store = SimulatedStore::new();
    if args.write_failure_rate > 0.0 {
        store = store.with_write_failure_rate(args.write_failure_rate, config.seed.unwrap_or(0));
    }
    let store = Arc::new(store);
    let client = RetryingClient::new(Arc::clone(&store), config.client.max_retries);
    let test = WriteReadSeriesTest::new(client, config.write_read_series.clone(), config.seed);

    // The simulated clock replaces the run interval; the real one only paces
    // the loop.
    let mut runner = Runner::new(SIMULATED_PACE);
    runner.add_test(Box::new(test));
    let mut clock = SteppingClock::new(SystemClock.now(), config.run_interval());

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                // Holding the sender keeps the runner going.
                std::future::pending::<()>().await;
            }
        }
    });

    let stats = runner
        .run(&mut clock, shutdown_rx, Some(args.iterations))
        .await?;

    info!(
        runs = stats.runs,
        failed_runs = stats.failed_runs,
        write_calls = store.write_calls(),
        query_calls = store.query_calls(),
        "Canary finished"
    );
    Ok(stats.failed_runs == 0)
}
