//! Metric sources polled by the telemetry collector.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::chaos::ChaosHarness;
use crate::dispatcher::{CircuitState, IntentDispatcher};

/// Named set of metric values.
pub type Metrics = BTreeMap<String, f64>;

/// Something that can be sampled for metrics.
///
/// Metrics from every registered source are merged into one map per sample;
/// on a name collision the later-registered source wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Source name, used in logs.
    fn name(&self) -> String;

    /// Take one sample.
    async fn sample(&self) -> Metrics;
}

/// Samples dispatcher telemetry.
///
/// Exports `avg_dispatch_time_ms`, `error_rate`, `circuit_open` (1.0 while
/// the global breaker is not closed), `active_intents`, `session_count` and
/// `total_dispatches`.
pub struct DispatcherMetricSource {
    dispatcher: Arc<IntentDispatcher>,
}

impl DispatcherMetricSource {
    /// Wrap a dispatcher.
    pub fn new(dispatcher: Arc<IntentDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl MetricSource for DispatcherMetricSource {
    fn name(&self) -> String {
        "dispatcher".to_string()
    }

    async fn sample(&self) -> Metrics {
        let telemetry = self.dispatcher.get_telemetry_data().await;
        let circuit_open = match telemetry.circuit_state {
            CircuitState::Closed => 0.0,
            CircuitState::Open | CircuitState::HalfOpen => 1.0,
        };

        let mut metrics = Metrics::new();
        metrics.insert("avg_dispatch_time_ms".into(), telemetry.avg_dispatch_time_ms);
        metrics.insert("error_rate".into(), telemetry.error_rate);
        metrics.insert("circuit_open".into(), circuit_open);
        metrics.insert("active_intents".into(), telemetry.active_intents as f64);
        metrics.insert("session_count".into(), telemetry.session_count as f64);
        metrics.insert("total_dispatches".into(), telemetry.total_dispatches as f64);
        metrics
    }
}

/// Samples the failure injection engine.
///
/// Exports `active_failures`, `pending_recoveries` and `max_failure_severity`.
pub struct HarnessMetricSource {
    harness: Arc<ChaosHarness>,
}

impl HarnessMetricSource {
    /// Wrap a harness.
    pub fn new(harness: Arc<ChaosHarness>) -> Self {
        Self { harness }
    }
}

#[async_trait]
impl MetricSource for HarnessMetricSource {
    fn name(&self) -> String {
        "chaos_harness".to_string()
    }

    async fn sample(&self) -> Metrics {
        let active = self.harness.active_failures().await;
        let max_severity = active.iter().map(|f| f.severity).max().unwrap_or(0);

        let mut metrics = Metrics::new();
        metrics.insert("active_failures".into(), active.len() as f64);
        metrics.insert(
            "pending_recoveries".into(),
            self.harness.pending_recoveries() as f64,
        );
        metrics.insert("max_failure_severity".into(), f64::from(max_severity));
        metrics
    }
}

/// Closure adapter for mock services.
pub struct FnMetricSource {
    name: String,
    sampler: Box<dyn Fn() -> Metrics + Send + Sync>,
}

impl FnMetricSource {
    /// Create a source from a sampling closure.
    pub fn new(name: impl Into<String>, sampler: impl Fn() -> Metrics + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            sampler: Box::new(sampler),
        }
    }
}

#[async_trait]
impl MetricSource for FnMetricSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn sample(&self) -> Metrics {
        (self.sampler)()
    }
}
