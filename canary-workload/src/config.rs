//! Canary configuration.
//!
//! Loaded from TOML; every section falls back to its defaults so a file only
//! needs the keys it changes.
//!
//! ```toml
//! run_interval_secs = 300
//! seed = 42
//!
//! [write_read_series]
//! num_series = 10000
//! max_query_age_secs = 604800
//! with_floats = true
//! with_histograms = true
//!
//! [client]
//! max_retries = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::write_read::WRITE_INTERVAL;

/// Configuration of the write/read series test.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteReadSeriesConfig {
    /// Number of series written per profile at every write interval.
    pub num_series: usize,
    /// How far back in the past metrics can be queried at most, in seconds.
    pub max_query_age_secs: u64,
    /// Write and verify the float sine wave profile.
    pub with_floats: bool,
    /// Write and verify the histogram profiles.
    pub with_histograms: bool,
}

impl Default for WriteReadSeriesConfig {
    fn default() -> Self {
        Self {
            num_series: 10_000,
            max_query_age_secs: 7 * 24 * 60 * 60,
            with_floats: false,
            with_histograms: false,
        }
    }
}

impl WriteReadSeriesConfig {
    /// Returns the maximum query age.
    #[must_use]
    pub const fn max_query_age(&self) -> Duration {
        Duration::from_secs(self.max_query_age_secs)
    }
}

/// Configuration of the store client decorator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Attempts per call before giving up on transient failures.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// Top-level canary configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanaryConfig {
    /// Seconds between two test runs.
    pub run_interval_secs: u64,
    /// Seed for the random query windows; random if unset.
    pub seed: Option<u64>,
    /// Write/read series test.
    pub write_read_series: WriteReadSeriesConfig,
    /// Store client.
    pub client: ClientConfig,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: 5 * 60,
            seed: None,
            write_read_series: WriteReadSeriesConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl CanaryConfig {
    /// Loads a configuration file.
    ///
    /// Unknown keys are rejected and numeric settings are range-checked
    /// here. Whether a profile is enabled is left to [`validate`], since
    /// command-line flags may still enable one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or holds
    /// an out-of-range setting.
    ///
    /// [`validate`]: CanaryConfig::validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.check_bounds()?;
        Ok(config)
    }

    /// Returns the interval between two test runs.
    #[must_use]
    pub const fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    /// Checks that the configuration can drive a test.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_bounds()?;
        let test = &self.write_read_series;
        if !test.with_floats && !test.with_histograms {
            return Err(ConfigError::invalid(
                "at least one of write_read_series.with_floats and with_histograms must be enabled",
            ));
        }
        Ok(())
    }

    fn check_bounds(&self) -> Result<(), ConfigError> {
        let test = &self.write_read_series;
        if test.num_series == 0 {
            return Err(ConfigError::invalid("write_read_series.num_series must be positive"));
        }
        if test.max_query_age() < WRITE_INTERVAL {
            return Err(ConfigError::invalid(
                "write_read_series.max_query_age_secs must cover at least one write interval",
            ));
        }
        if self.run_interval() < WRITE_INTERVAL {
            return Err(ConfigError::invalid(
                "run_interval_secs must cover at least one write interval",
            ));
        }
        if self.client.max_retries == 0 {
            return Err(ConfigError::invalid("client.max_retries must be at least 1"));
        }
        Ok(())
    }
}

/// A configuration that cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read canary config {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The configuration file is not valid canary TOML.
    #[error("cannot parse canary config {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error, with the offending line.
        source: toml::de::Error,
    },
    /// A setting is out of range.
    #[error("invalid canary config: {message}")]
    Invalid {
        /// Which setting and why.
        message: String,
    },
}

impl ConfigError {
    fn invalid(message: &str) -> Self {
        Self::Invalid {
            message: message.to_string(),
        }
    }
}
