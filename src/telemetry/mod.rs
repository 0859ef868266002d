//! Telemetry collection and anomaly detection.
//!
//! The [`TelemetryCollector`] polls registered [`MetricSource`]s, first to
//! build a baseline and then on a fixed period while chaos is injected. Each
//! monitoring sample is checked against per-metric thresholds; breaches are
//! recorded as [`Anomaly`] entries graded by [`Severity`].

pub mod baseline;
pub mod collector;
pub mod sources;
pub mod types;

pub use baseline::{BaselineCalculator, MetricBaseline, TriggerLevel};
pub use collector::{detect_anomaly, TelemetryCollector};
pub use sources::{DispatcherMetricSource, FnMetricSource, HarnessMetricSource, MetricSource, Metrics};
pub use types::{
    Anomaly, ChaosEvent, MetricDelta, Severity, TelemetryReport, TelemetrySample,
    TelemetrySnapshot, ThresholdBound, TimelinePoint, TimelineVisualization,
};
