//! Per-metric baseline drift detection.
//!
//! Baselines combine two views of the pre-chaos samples:
//! - **Rolling average**: stable thresholds (warning/critical multipliers)
//! - **EMA (Exponential Moving Average)**: trend detection
//!
//! Drift is reported on live values relative to the baseline and is separate
//! from the absolute anomaly thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BaselineConfig;

/// EMA deviation above which a value counts as a trend.
const TREND_DEVIATION: f64 = 0.5;

/// Level of drift detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerLevel {
    /// EMA indicates significant trend change
    Trend,
    /// Value above warning threshold
    Warning,
    /// Value above critical threshold
    Critical,
}

impl std::fmt::Display for TriggerLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerLevel::Trend => write!(f, "trend"),
            TriggerLevel::Warning => write!(f, "warning"),
            TriggerLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Baseline data for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    /// Name of the metric
    pub metric_name: String,

    /// Rolling average value
    pub rolling_avg: f64,

    /// Number of samples in rolling average
    pub sample_count: usize,

    /// EMA value
    pub ema_value: f64,

    /// Warning threshold derived from baseline
    pub warning_threshold: f64,

    /// Critical threshold derived from baseline
    pub critical_threshold: f64,

    /// Last update time
    pub last_updated: DateTime<Utc>,

    /// Whether baseline has enough data to be valid
    pub is_valid: bool,
}

impl MetricBaseline {
    /// Create an empty baseline.
    pub fn new(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            rolling_avg: 0.0,
            sample_count: 0,
            ema_value: 0.0,
            warning_threshold: 0.0,
            critical_threshold: 0.0,
            last_updated: Utc::now(),
            is_valid: false,
        }
    }
}

/// Hybrid baseline calculator.
#[derive(Debug, Clone)]
pub struct BaselineCalculator {
    config: BaselineConfig,
}

impl BaselineCalculator {
    /// Create a new baseline calculator.
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    /// Fold a new observation into the baseline.
    pub fn update(&self, baseline: &mut MetricBaseline, value: f64, timestamp: DateTime<Utc>) {
        if baseline.sample_count == 0 {
            baseline.ema_value = value;
            baseline.rolling_avg = value;
        } else {
            baseline.ema_value =
                self.config.ema_alpha * value + (1.0 - self.config.ema_alpha) * baseline.ema_value;

            // new_avg = old_avg + (value - old_avg) / (n + 1)
            let n = baseline.sample_count as f64;
            baseline.rolling_avg += (value - baseline.rolling_avg) / (n + 1.0);
        }

        baseline.sample_count += 1;
        baseline.warning_threshold = baseline.rolling_avg * self.config.warning_multiplier;
        baseline.critical_threshold = baseline.rolling_avg * self.config.critical_multiplier;
        baseline.last_updated = timestamp;
        baseline.is_valid = baseline.sample_count >= self.config.min_samples;
    }

    /// Drift of `value` against the baseline.
    ///
    /// A zero baseline has no meaningful multiplier thresholds, so any
    /// positive value there only counts as a trend.
    pub fn check_trigger(&self, baseline: &MetricBaseline, value: f64) -> Option<TriggerLevel> {
        if !baseline.is_valid {
            return None;
        }

        if baseline.rolling_avg <= 0.0 {
            return (value > 0.0).then_some(TriggerLevel::Trend);
        }

        if value >= baseline.critical_threshold {
            return Some(TriggerLevel::Critical);
        }
        if value >= baseline.warning_threshold {
            return Some(TriggerLevel::Warning);
        }

        if baseline.ema_value > 0.0 {
            let ema_deviation = (value - baseline.ema_value).abs() / baseline.ema_value;
            if ema_deviation > TREND_DEVIATION {
                return Some(TriggerLevel::Trend);
            }
        }

        None
    }

    /// Deviation from the rolling average (percent).
    pub fn deviation_pct(&self, baseline: &MetricBaseline, value: f64) -> f64 {
        if baseline.rolling_avg == 0.0 {
            if value > 0.0 {
                100.0
            } else {
                0.0
            }
        } else {
            ((value - baseline.rolling_avg) / baseline.rolling_avg) * 100.0
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }
}
