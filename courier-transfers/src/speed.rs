//! Windowed transfer-rate estimation
//!
//! The estimate reflects recent throughput rather than a lifetime average:
//! each sample is compared with the previous sample point, not with the start
//! of the transfer, so stalls and bursts show up promptly.

use std::time::{Duration, Instant};

use crate::config::RecordConfig;

/// A cumulative byte count observed at a point in time
#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes: u64,
    at: Instant,
}

/// Smoothed bytes-per-second estimate fed with cumulative byte counts
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    min_interval: Duration,
    smoothing: f64,
    last: Option<Sample>,
    estimate: f64,
    published: bool,
}

impl SpeedEstimator {
    /// Create an estimator with no sample point yet
    pub fn new(min_interval: Duration, smoothing: f64) -> Self {
        Self {
            min_interval,
            smoothing: smoothing.clamp(f64::MIN_POSITIVE, 1.0),
            last: None,
            estimate: 0.0,
            published: false,
        }
    }

    /// Create an estimator from record settings
    pub fn from_config(config: &RecordConfig) -> Self {
        Self::new(config.min_sample_interval(), config.speed_smoothing)
    }

    /// Feed a cumulative byte count observed at `now`, returning the estimate
    ///
    /// The first sample only establishes a reference point and yields 0.
    /// Samples arriving sooner than the minimum interval after the last
    /// accepted one leave both the estimate and the reference point unchanged.
    pub fn sample(&mut self, cumulative_bytes: u64, now: Instant) -> f64 {
        let Some(last) = self.last else {
            self.last = Some(Sample {
                bytes: cumulative_bytes,
                at: now,
            });
            return self.estimate;
        };

        let elapsed = now.saturating_duration_since(last.at);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return self.estimate;
        }

        let delta = cumulative_bytes.saturating_sub(last.bytes);
        let rate = delta as f64 / elapsed.as_secs_f64();

        // The first real rate is taken as-is; later ones are blended in
        self.estimate = if self.published {
            self.smoothing * rate + (1.0 - self.smoothing) * self.estimate
        } else {
            rate
        };
        self.published = true;
        self.last = Some(Sample {
            bytes: cumulative_bytes,
            at: now,
        });
        self.estimate
    }

    /// Current estimate in bytes per second
    pub fn bytes_per_second(&self) -> f64 {
        self.estimate
    }

    /// Returns true once a reference sample has been recorded
    pub fn has_baseline(&self) -> bool {
        self.last.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(250);

    #[test]
    fn test_first_sample_is_zero() {
        let mut speed = SpeedEstimator::new(INTERVAL, 1.0);
        let start = Instant::now();
        assert!(!speed.has_baseline());
        assert_eq!(speed.sample(4096, start), 0.0);
        assert!(speed.has_baseline());
    }

    #[test]
    fn test_rate_over_window() {
        let mut speed = SpeedEstimator::new(INTERVAL, 1.0);
        let start = Instant::now();
        speed.sample(0, start);

        let rate = speed.sample(1000, start + Duration::from_secs(1));
        assert!((rate - 1000.0).abs() < 1e-9);

        // Window is since the previous sample, not since the start
        let rate = speed.sample(1500, start + Duration::from_secs(2));
        assert!((rate - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_inside_min_interval_is_debounced() {
        let mut speed = SpeedEstimator::new(INTERVAL, 1.0);
        let start = Instant::now();
        speed.sample(0, start);
        let rate = speed.sample(1000, start + Duration::from_secs(1));

        // Too soon: estimate and reference point unchanged
        let debounced = speed.sample(900_000, start + Duration::from_millis(1100));
        assert_eq!(debounced, rate);

        // Next accepted sample measures from the last accepted point (t = 1s)
        let next = speed.sample(2000, start + Duration::from_secs(2));
        assert!((next - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_stall_decays_toward_zero() {
        let mut speed = SpeedEstimator::new(INTERVAL, 0.5);
        let start = Instant::now();
        speed.sample(0, start);
        let first = speed.sample(1000, start + Duration::from_secs(1));
        assert!((first - 1000.0).abs() < 1e-9);

        let second = speed.sample(1000, start + Duration::from_secs(2));
        assert!((second - 500.0).abs() < 1e-9);
        let third = speed.sample(1000, start + Duration::from_secs(3));
        assert!((third - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_blends_rates() {
        let mut speed = SpeedEstimator::new(INTERVAL, 0.25);
        let start = Instant::now();
        speed.sample(0, start);
        speed.sample(1000, start + Duration::from_secs(1));

        // 0.25 * 3000 + 0.75 * 1000
        let rate = speed.sample(4000, start + Duration::from_secs(2));
        assert!((rate - 1500.0).abs() < 1e-9);
        assert_eq!(speed.bytes_per_second(), rate);
    }

    #[test]
    fn test_regressing_counts_do_not_underflow() {
        let mut speed = SpeedEstimator::new(INTERVAL, 1.0);
        let start = Instant::now();
        speed.sample(5000, start);
        let rate = speed.sample(1000, start + Duration::from_secs(1));
        assert_eq!(rate, 0.0);
    }
}
