//! Telemetry data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::baseline::TriggerLevel;

// ============================================================================
// Severity
// ============================================================================

/// Severity of an anomaly, graded by how far the sample overshoots its
/// threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Marginal breach (< 25% past the threshold)
    Info = 0,
    /// Moderate breach (25% - 50%)
    Warning = 1,
    /// Significant breach (50% - 100%)
    High = 2,
    /// Severe breach (>= 100%)
    Critical = 3,
}

impl Severity {
    /// Determine severity from deviation percentage.
    pub fn from_deviation(deviation_pct: f64) -> Self {
        match deviation_pct {
            d if d >= 100.0 => Severity::Critical,
            d if d >= 50.0 => Severity::High,
            d if d >= 25.0 => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

// ============================================================================
// Samples and Anomalies
// ============================================================================

/// Which side of a threshold was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdBound {
    /// Sample above `max`
    Max,
    /// Sample below `min`
    Min,
}

/// A metric sample that breached its configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Metric name
    pub metric: String,
    /// Sampled value
    pub value: f64,
    /// The bound that was crossed
    pub threshold: f64,
    /// Whether `threshold` is a max or min bound
    pub bound: ThresholdBound,
    /// Graded severity
    pub severity: Severity,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

/// Raw baseline sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Merged metrics from every source
    pub metrics: BTreeMap<String, f64>,
}

/// One chaos-monitoring sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Merged metrics from every source
    pub metrics: BTreeMap<String, f64>,
    /// Threshold breaches in this sample
    pub anomalies: Vec<Anomaly>,
    /// Chaos events open when the sample was taken
    #[serde(default)]
    pub active_events: Vec<String>,
}

// ============================================================================
// Chaos Events
// ============================================================================

/// A bracketed failure window on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosEvent {
    /// Unique ID
    pub id: String,
    /// Kind of chaos (usually a failure type)
    pub kind: String,
    /// Affected target
    pub target: String,
    /// Window start
    pub started_at: DateTime<Utc>,
    /// Window end; `None` while open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChaosEvent {
    /// Whether the event window is still open.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether `at` falls inside the event window.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.started_at && self.ended_at.map_or(true, |end| at <= end)
    }
}

// ============================================================================
// Reports
// ============================================================================

/// One point of a timeline projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Requested metrics present in the sample
    pub values: BTreeMap<String, f64>,
    /// Anomalies on the requested metrics
    pub anomalies: Vec<Anomaly>,
    /// Events covering the sample time
    pub events: Vec<String>,
}

/// Time-ordered projection of the monitoring history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineVisualization {
    /// When the projection was built
    pub generated_at: DateTime<Utc>,
    /// Metrics included
    pub metrics: Vec<String>,
    /// Samples, oldest first
    pub points: Vec<TimelinePoint>,
    /// Event windows
    pub events: Vec<ChaosEvent>,
}

/// Live value of one metric compared with its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    /// Metric name
    pub metric: String,
    /// Baseline rolling average
    pub baseline: f64,
    /// Latest sampled value
    pub current: f64,
    /// `current - baseline`
    pub delta: f64,
    /// Deviation from baseline (percent)
    pub deviation_pct: f64,
    /// Drift detected against the baseline, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<TriggerLevel>,
}

/// Aggregate telemetry summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// When the report was built
    pub generated_at: DateTime<Utc>,
    /// Baseline rolling averages
    pub baseline: BTreeMap<String, f64>,
    /// Metrics from the most recent snapshot
    pub latest: BTreeMap<String, f64>,
    /// Per-metric comparison with the baseline
    pub deltas: Vec<MetricDelta>,
    /// Snapshots currently retained
    pub sample_count: usize,
    /// Snapshots taken since the collector was reset
    pub total_samples: u64,
    /// Anomalies in retained snapshots
    pub anomaly_count: usize,
    /// Anomalies per metric
    pub anomalies_by_metric: BTreeMap<String, usize>,
    /// Anomalies per severity
    pub anomalies_by_severity: BTreeMap<Severity, usize>,
    /// Bracketed chaos events
    pub events: Vec<ChaosEvent>,
}
