//! Application configuration loaded from environment variables.

use std::str::FromStr;

use jobs::{FailureThreshold, RetryConfig};

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `BULK_MAX_FAILURES`: abort a bulk job once more orders than this fail (default: unset)
/// - `BULK_MAX_FAILURE_RATIO`: abort once the failed share exceeds this ratio (default: unset)
/// - `BULK_MIN_SAMPLE`: attempts before the ratio is checked (default: `10`)
/// - `PROGRESS_MAX_ATTEMPTS`: commit attempts per progress update (default: `5`)
/// - `PROGRESS_CHANNEL_CAPACITY`: progress recorder mailbox size (default: `64`)
/// - `DEMO_ORDERS`: orders checked out by the demo run (default: `25`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: String,
    pub max_failures: Option<u64>,
    pub max_failure_ratio: Option<f64>,
    pub min_sample: u64,
    pub progress_max_attempts: u32,
    pub progress_channel_capacity: usize,
    pub demo_orders: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            max_failures: parse_var(&lookup, "BULK_MAX_FAILURES"),
            max_failure_ratio: parse_var::<f64>(&lookup, "BULK_MAX_FAILURE_RATIO")
                .filter(|ratio| (0.0..=1.0).contains(ratio)),
            min_sample: parse_var(&lookup, "BULK_MIN_SAMPLE").unwrap_or(defaults.min_sample),
            progress_max_attempts: parse_var::<u32>(&lookup, "PROGRESS_MAX_ATTEMPTS")
                .filter(|&attempts| attempts > 0)
                .unwrap_or(defaults.progress_max_attempts),
            progress_channel_capacity: parse_var::<usize>(&lookup, "PROGRESS_CHANNEL_CAPACITY")
                .filter(|&capacity| capacity > 0)
                .unwrap_or(defaults.progress_channel_capacity),
            demo_orders: parse_var(&lookup, "DEMO_ORDERS").unwrap_or(defaults.demo_orders),
        }
    }

    /// Returns the failure threshold applied to bulk jobs.
    pub fn failure_threshold(&self) -> FailureThreshold {
        FailureThreshold {
            max_failures: self.max_failures,
            max_failure_ratio: self.max_failure_ratio,
            min_sample: self.min_sample,
        }
    }

    /// Returns the retry policy of the progress recorder.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.progress_max_attempts,
            ..RetryConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_failures: None,
            max_failure_ratio: None,
            min_sample: 10,
            progress_max_attempts: 5,
            progress_channel_capacity: 64,
            demo_orders: 25,
        }
    }
}
