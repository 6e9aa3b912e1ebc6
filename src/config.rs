//! Configuration management for keygate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{KeygateError, Result};

/// Prefix for environment overrides, e.g. `KEYGATE__SLIDING_WINDOW__MAX_REQUESTS=5`.
const ENV_PREFIX: &str = "KEYGATE";

/// Main configuration grouping both policies and the sweeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeygateConfig {
    /// Sliding-window limiter configuration
    #[serde(default)]
    pub sliding_window: SlidingWindowConfig,

    /// Fixed-interval limiter configuration
    #[serde(default)]
    pub fixed_interval: FixedIntervalConfig,

    /// Idle key eviction configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Sliding-window limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Length of the trailing window in seconds
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: f64,

    /// Requests admitted per key within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size_secs(),
            max_requests: default_max_requests(),
        }
    }
}

impl SlidingWindowConfig {
    /// Create a configuration with the given window and capacity.
    pub fn new(window_size_secs: f64, max_requests: u32) -> Self {
        Self {
            window_size_secs,
            max_requests,
        }
    }

    /// The validated window length.
    pub fn window_size(&self) -> Result<Duration> {
        positive_secs("window_size_secs", self.window_size_secs)
    }
}

fn default_window_size_secs() -> f64 {
    10.0
}

fn default_max_requests() -> u32 {
    1
}

/// Fixed-interval limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedIntervalConfig {
    /// Minimum spacing between admitted requests for one key, in seconds
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: f64,
}

impl Default for FixedIntervalConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

impl FixedIntervalConfig {
    /// Create a configuration with the given interval.
    pub fn new(min_interval_secs: f64) -> Self {
        Self { min_interval_secs }
    }

    /// The validated minimum interval.
    pub fn min_interval(&self) -> Result<Duration> {
        positive_secs("min_interval_secs", self.min_interval_secs)
    }
}

fn default_min_interval_secs() -> f64 {
    10.0
}

/// Background sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether callers should run a sweeper at all
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: f64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SweeperConfig {
    /// The validated sweep interval.
    pub fn interval(&self) -> Result<Duration> {
        positive_secs("interval_secs", self.interval_secs)
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> f64 {
    60.0
}

/// Convert a seconds value into a `Duration`, rejecting zero, negative and
/// non-finite input.
fn positive_secs(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(KeygateError::Config(format!(
            "{} must be a finite number greater than 0, got {}",
            name, secs
        )));
    }

    Duration::try_from_secs_f64(secs)
        .map_err(|e| KeygateError::Config(format!("{} is out of range: {}", name, e)))
}

impl KeygateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading keygate configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: KeygateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| KeygateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply `KEYGATE__`
    /// environment overrides on top of it.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `KEYGATE__FIXED_INTERVAL__MIN_INTERVAL_SECS=2.5`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading keygate configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: KeygateConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| KeygateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every section for values that would leave a policy undefined.
    pub fn validate(&self) -> Result<()> {
        self.sliding_window.window_size()?;
        self.fixed_interval.min_interval()?;
        if self.sweeper.enabled {
            self.sweeper.interval()?;
        }
        Ok(())
    }
}
