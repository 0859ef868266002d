//! Telemetry collector.
//!
//! # Lifecycle
//!
//! ```text
//! register_source* → collect_baseline_metrics → start_chaos_monitoring
//!     → (register_chaos_event / unregister_chaos_event)*
//!     → stop_chaos_monitoring → generate_* reports
//! ```
//!
//! Baseline samples are kept apart from the monitoring history. The history
//! is a ring buffer of `max_data_points` snapshots, oldest evicted first.
//! Sample timestamps are strictly increasing across both phases.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::baseline::{BaselineCalculator, MetricBaseline};
use super::sources::{MetricSource, Metrics};
use super::types::{
    Anomaly, ChaosEvent, MetricDelta, Severity, TelemetryReport, TelemetrySample,
    TelemetrySnapshot, ThresholdBound, TimelinePoint, TimelineVisualization,
};
use crate::config::{MetricThreshold, TelemetryConfig};
use crate::error::{HarnessError, HarnessResult};

// ============================================================================
// Anomaly Detection
// ============================================================================

/// Check one value against its threshold.
///
/// Severity grades the overshoot relative to the crossed bound; a zero bound
/// counts any breach as a 100% overshoot.
pub fn detect_anomaly(
    metric: &str,
    value: f64,
    threshold: &MetricThreshold,
    timestamp: DateTime<Utc>,
) -> Option<Anomaly> {
    let (bound_value, bound) = match (threshold.max, threshold.min) {
        (Some(max), _) if value > max => (max, ThresholdBound::Max),
        (_, Some(min)) if value < min => (min, ThresholdBound::Min),
        _ => return None,
    };

    let deviation_pct = if bound_value == 0.0 {
        100.0
    } else {
        (value - bound_value).abs() / bound_value.abs() * 100.0
    };

    Some(Anomaly {
        metric: metric.to_string(),
        value,
        threshold: bound_value,
        bound,
        severity: Severity::from_deviation(deviation_pct),
        timestamp,
    })
}

// ============================================================================
// Shared State
// ============================================================================

struct Baseline {
    samples: Vec<TelemetrySample>,
    metrics: BTreeMap<String, MetricBaseline>,
}

#[derive(Default)]
struct CollectorState {
    baseline: Option<Baseline>,
    history: VecDeque<TelemetrySnapshot>,
    events: Vec<ChaosEvent>,
    last_timestamp: Option<DateTime<Utc>>,
    total_samples: u64,
}

impl CollectorState {
    /// Wall-clock time, bumped past the previous sample if the clock has not
    /// advanced.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

struct Shared {
    config: TelemetryConfig,
    sources: RwLock<Vec<Arc<dyn MetricSource>>>,
    thresholds: RwLock<HashMap<String, MetricThreshold>>,
    state: RwLock<CollectorState>,
}

impl Shared {
    async fn poll_sources(&self) -> Metrics {
        let sources: Vec<Arc<dyn MetricSource>> = self.sources.read().await.clone();
        let mut merged = Metrics::new();
        for source in sources {
            let metrics = source.sample().await;
            debug!(source = %source.name(), metrics = metrics.len(), "Sampled metric source");
            merged.extend(metrics);
        }
        merged
    }

    async fn take_snapshot(&self) -> TelemetrySnapshot {
        let metrics = self.poll_sources().await;
        let thresholds = self.thresholds.read().await.clone();
        let mut state = self.state.write().await;
        let timestamp = state.next_timestamp();

        let anomalies: Vec<Anomaly> = metrics
            .iter()
            .filter_map(|(metric, value)| {
                thresholds
                    .get(metric)
                    .and_then(|threshold| detect_anomaly(metric, *value, threshold, timestamp))
            })
            .collect();

        for anomaly in &anomalies {
            warn!(
                metric = %anomaly.metric,
                value = anomaly.value,
                threshold = anomaly.threshold,
                severity = %anomaly.severity,
                "Telemetry anomaly"
            );
        }

        let active_events = state
            .events
            .iter()
            .filter(|event| event.is_open())
            .map(|event| event.id.clone())
            .collect();

        let snapshot = TelemetrySnapshot {
            timestamp,
            metrics,
            anomalies,
            active_events,
        };

        state.history.push_back(snapshot.clone());
        while state.history.len() > self.config.max_data_points {
            state.history.pop_front();
        }
        state.total_samples += 1;
        snapshot
    }
}

struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

// ============================================================================
// TelemetryCollector
// ============================================================================

/// Polls metric sources, detects anomalies and projects reports.
///
/// # Example
///
/// ```rust,ignore
/// let collector = TelemetryCollector::new(config.telemetry.clone());
/// collector.register_source(Arc::new(DispatcherMetricSource::new(dispatcher))).await;
///
/// collector.collect_baseline_metrics(Duration::from_millis(500)).await?;
/// collector.start_chaos_monitoring(Duration::from_millis(100)).await?;
/// // ... inject failures ...
/// collector.stop_chaos_monitoring().await;
/// let report = collector.generate_telemetry_report().await;
/// ```
pub struct TelemetryCollector {
    shared: Arc<Shared>,
    calculator: BaselineCalculator,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl TelemetryCollector {
    /// Create a collector with no sources.
    pub fn new(config: TelemetryConfig) -> Self {
        let calculator = BaselineCalculator::new(config.baseline.clone());
        let thresholds = config.thresholds.clone();
        Self {
            shared: Arc::new(Shared {
                config,
                sources: RwLock::new(Vec::new()),
                thresholds: RwLock::new(thresholds),
                state: RwLock::new(CollectorState::default()),
            }),
            calculator,
            monitor: Mutex::new(None),
        }
    }

    /// Add a metric source.
    pub async fn register_source(&self, source: Arc<dyn MetricSource>) {
        info!(source = %source.name(), "Metric source registered");
        self.shared.sources.write().await.push(source);
    }

    /// Set or replace the anomaly threshold for a metric.
    pub async fn set_threshold(&self, metric: &str, threshold: MetricThreshold) {
        self.shared
            .thresholds
            .write()
            .await
            .insert(metric.to_string(), threshold);
    }

    /// Current anomaly thresholds.
    pub async fn thresholds(&self) -> HashMap<String, MetricThreshold> {
        self.shared.thresholds.read().await.clone()
    }

    // ========================================================================
    // Baseline
    // ========================================================================

    /// Sample every source for `duration` and store the result as baseline.
    ///
    /// At least one sample is taken. Replaces any previous baseline. Returns
    /// the per-metric rolling averages.
    pub async fn collect_baseline_metrics(
        &self,
        duration: Duration,
    ) -> HarnessResult<BTreeMap<String, f64>> {
        if self.is_monitoring().await {
            return Err(HarnessError::MonitoringActive);
        }

        let interval = Duration::from_millis(self.shared.config.baseline_sample_interval_ms.max(1));
        let start = Instant::now();
        let mut samples = Vec::new();
        let mut metrics: BTreeMap<String, MetricBaseline> = BTreeMap::new();

        loop {
            let values = self.shared.poll_sources().await;
            let timestamp = self.shared.state.write().await.next_timestamp();
            for (name, value) in &values {
                let baseline = metrics
                    .entry(name.clone())
                    .or_insert_with(|| MetricBaseline::new(name));
                self.calculator.update(baseline, *value, timestamp);
            }
            samples.push(TelemetrySample {
                timestamp,
                metrics: values,
            });

            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }
            tokio::time::sleep(interval.min(duration - elapsed)).await;
        }

        let averages: BTreeMap<String, f64> = metrics
            .iter()
            .map(|(name, baseline)| (name.clone(), baseline.rolling_avg))
            .collect();

        info!(
            samples = samples.len(),
            metrics = averages.len(),
            "Baseline collected"
        );
        self.shared.state.write().await.baseline = Some(Baseline { samples, metrics });
        Ok(averages)
    }

    /// Baseline rolling averages, if a baseline has been collected.
    pub async fn baseline(&self) -> Option<BTreeMap<String, f64>> {
        let state = self.shared.state.read().await;
        state.baseline.as_ref().map(|baseline| {
            baseline
                .metrics
                .iter()
                .map(|(name, metric)| (name.clone(), metric.rolling_avg))
                .collect()
        })
    }

    /// Full per-metric baselines.
    pub async fn baseline_metrics(&self) -> Option<BTreeMap<String, MetricBaseline>> {
        let state = self.shared.state.read().await;
        state.baseline.as_ref().map(|baseline| baseline.metrics.clone())
    }

    /// Raw baseline samples, oldest first.
    pub async fn baseline_samples(&self) -> Vec<TelemetrySample> {
        let state = self.shared.state.read().await;
        state
            .baseline
            .as_ref()
            .map(|baseline| baseline.samples.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Sample on a fixed period until stopped. The first sample is taken
    /// immediately.
    pub async fn start_chaos_monitoring(&self, interval: Duration) -> HarnessResult<()> {
        if interval.is_zero() {
            return Err(HarnessError::invalid("interval", "must be greater than zero"));
        }
        if self.shared.state.read().await.baseline.is_none() {
            return Err(HarnessError::BaselineMissing);
        }

        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return Err(HarnessError::MonitoringActive);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        shared.take_snapshot().await;
                    }
                }
            }
            debug!("Chaos monitoring loop exited");
        });

        *monitor = Some(MonitorHandle { shutdown, task });
        info!(interval_ms = interval.as_millis() as u64, "Chaos monitoring started");
        Ok(())
    }

    /// Stop the monitoring loop. Returns whether it was running.
    pub async fn stop_chaos_monitoring(&self) -> bool {
        let Some(handle) = self.monitor.lock().await.take() else {
            return false;
        };
        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Chaos monitoring task ended abnormally");
        }
        info!("Chaos monitoring stopped");
        true
    }

    /// Whether the monitoring loop is running.
    pub async fn is_monitoring(&self) -> bool {
        self.monitor.lock().await.is_some()
    }

    /// Take one monitoring sample immediately.
    pub async fn sample_now(&self) -> TelemetrySnapshot {
        self.shared.take_snapshot().await
    }

    // ========================================================================
    // Chaos Events
    // ========================================================================

    /// Open a chaos event window. Returns the event ID.
    pub async fn register_chaos_event(&self, kind: &str, target: &str) -> String {
        let mut state = self.shared.state.write().await;
        let event = ChaosEvent {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            target: target.to_string(),
            started_at: state.next_timestamp(),
            ended_at: None,
        };
        info!(event_id = %event.id, kind, target_name = target, "Chaos event registered");
        let id = event.id.clone();
        state.events.push(event);
        id
    }

    /// Close a chaos event window. Returns whether an open event was closed.
    pub async fn unregister_chaos_event(&self, event_id: &str) -> bool {
        let mut state = self.shared.state.write().await;
        let Some(index) = state
            .events
            .iter()
            .position(|event| event.id == event_id && event.is_open())
        else {
            return false;
        };
        let ended_at = state.next_timestamp();
        state.events[index].ended_at = Some(ended_at);
        info!(event_id, "Chaos event unregistered");
        true
    }

    /// All chaos events, in registration order.
    pub async fn chaos_events(&self) -> Vec<ChaosEvent> {
        self.shared.state.read().await.events.clone()
    }

    // ========================================================================
    // Projections
    // ========================================================================

    /// Retained monitoring snapshots, oldest first.
    pub async fn get_history(&self) -> Vec<TelemetrySnapshot> {
        self.shared.state.read().await.history.iter().cloned().collect()
    }

    /// Anomalies in retained snapshots, oldest first.
    pub async fn get_anomalies(&self) -> Vec<Anomaly> {
        let state = self.shared.state.read().await;
        state
            .history
            .iter()
            .flat_map(|snapshot| snapshot.anomalies.iter().cloned())
            .collect()
    }

    /// Time-ordered series for the requested metrics plus event windows.
    ///
    /// An empty `metric_names` selects every metric seen in the history.
    pub async fn generate_chaos_timeline_visualization(
        &self,
        metric_names: &[&str],
    ) -> TimelineVisualization {
        let state = self.shared.state.read().await;

        let metrics: Vec<String> = if metric_names.is_empty() {
            let mut all: Vec<String> = state
                .history
                .iter()
                .flat_map(|snapshot| snapshot.metrics.keys().cloned())
                .collect();
            all.sort();
            all.dedup();
            all
        } else {
            metric_names.iter().map(|name| name.to_string()).collect()
        };

        let points = state
            .history
            .iter()
            .map(|snapshot| TimelinePoint {
                timestamp: snapshot.timestamp,
                values: snapshot
                    .metrics
                    .iter()
                    .filter(|(name, _)| metrics.contains(name))
                    .map(|(name, value)| (name.clone(), *value))
                    .collect(),
                anomalies: snapshot
                    .anomalies
                    .iter()
                    .filter(|anomaly| metrics.contains(&anomaly.metric))
                    .cloned()
                    .collect(),
                events: state
                    .events
                    .iter()
                    .filter(|event| event.covers(snapshot.timestamp))
                    .map(|event| event.id.clone())
                    .collect(),
            })
            .collect();

        TimelineVisualization {
            generated_at: Utc::now(),
            metrics,
            points,
            events: state.events.clone(),
        }
    }

    /// Baseline vs. latest comparison with anomaly totals.
    pub async fn generate_telemetry_report(&self) -> TelemetryReport {
        let state = self.shared.state.read().await;

        let baseline: BTreeMap<String, f64> = state
            .baseline
            .as_ref()
            .map(|b| {
                b.metrics
                    .iter()
                    .map(|(name, metric)| (name.clone(), metric.rolling_avg))
                    .collect()
            })
            .unwrap_or_default();
        let latest = state
            .history
            .back()
            .map(|snapshot| snapshot.metrics.clone())
            .unwrap_or_default();

        let deltas = match &state.baseline {
            Some(b) => latest
                .iter()
                .filter_map(|(name, current)| {
                    let metric = b.metrics.get(name)?;
                    Some(MetricDelta {
                        metric: name.clone(),
                        baseline: metric.rolling_avg,
                        current: *current,
                        delta: current - metric.rolling_avg,
                        deviation_pct: self.calculator.deviation_pct(metric, *current),
                        drift: self.calculator.check_trigger(metric, *current),
                    })
                })
                .collect(),
            None => Vec::new(),
        };

        let mut anomalies_by_metric = BTreeMap::new();
        let mut anomalies_by_severity = BTreeMap::new();
        let mut anomaly_count = 0;
        for anomaly in state.history.iter().flat_map(|s| s.anomalies.iter()) {
            *anomalies_by_metric.entry(anomaly.metric.clone()).or_insert(0) += 1;
            *anomalies_by_severity.entry(anomaly.severity).or_insert(0) += 1;
            anomaly_count += 1;
        }

        TelemetryReport {
            generated_at: Utc::now(),
            baseline,
            latest,
            deltas,
            sample_count: state.history.len(),
            total_samples: state.total_samples,
            anomaly_count,
            anomalies_by_metric,
            anomalies_by_severity,
            events: state.events.clone(),
        }
    }

    /// Stop monitoring and drop baseline, history and events.
    pub async fn reset(&self) {
        self.stop_chaos_monitoring().await;
        *self.shared.state.write().await = CollectorState::default();
        debug!("Telemetry collector reset");
    }
}
