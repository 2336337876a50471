//! Record tuning parameters
//!
//! Settings are plain JSON so they can live next to the rest of an
//! application's configuration. Missing fields fall back to defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default minimum spacing between speed samples
pub const DEFAULT_MIN_SAMPLE_INTERVAL_MS: u64 = 250;

/// Default weight of the newest windowed rate in the smoothed speed
pub const DEFAULT_SPEED_SMOOTHING: f64 = 0.5;

// =============================================================================
// Record Config
// =============================================================================

/// Tuning for speed estimation on every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Samples closer together than this keep the previous estimate
    #[serde(default = "default_min_sample_interval_ms")]
    pub min_sample_interval_ms: u64,

    /// Weight in (0, 1] given to the newest rate; 1.0 disables smoothing
    #[serde(default = "default_speed_smoothing")]
    pub speed_smoothing: f64,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            min_sample_interval_ms: DEFAULT_MIN_SAMPLE_INTERVAL_MS,
            speed_smoothing: DEFAULT_SPEED_SMOOTHING,
        }
    }
}

fn default_min_sample_interval_ms() -> u64 {
    DEFAULT_MIN_SAMPLE_INTERVAL_MS
}

fn default_speed_smoothing() -> f64 {
    DEFAULT_SPEED_SMOOTHING
}

impl RecordConfig {
    /// Load and validate a config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse and validate a config from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RecordConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the speed estimator cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.speed_smoothing > 0.0 && self.speed_smoothing <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "speed_smoothing must be in (0, 1], got {}",
                self.speed_smoothing
            )));
        }
        Ok(())
    }

    /// Minimum sample interval as a duration
    pub fn min_sample_interval(&self) -> Duration {
        Duration::from_millis(self.min_sample_interval_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
