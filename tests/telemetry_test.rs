//! Telemetry collector integration tests
//!
//! Sources are closures over shared counters or the real dispatcher and
//! failure injection engine. Sampling runs on a paused tokio clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chaos_harness::chaos::{ChaosHarness, FailureOptions, FailureType};
use chaos_harness::config::{ChaosConfig, MetricThreshold, TelemetryConfig};
use chaos_harness::error::HarnessError;
use chaos_harness::telemetry::{
    FnMetricSource, HarnessMetricSource, Metrics, Severity, TelemetryCollector, ThresholdBound,
    TriggerLevel,
};

/// Source exporting `queue_depth` from a shared counter.
fn queue_source(depth: Arc<AtomicU64>) -> Arc<FnMetricSource> {
    Arc::new(FnMetricSource::new("queue", move || {
        Metrics::from([(
            "queue_depth".to_string(),
            depth.load(Ordering::SeqCst) as f64,
        )])
    }))
}

fn create_collector(thresholds: HashMap<String, MetricThreshold>) -> TelemetryCollector {
    TelemetryCollector::new(TelemetryConfig {
        thresholds,
        ..TelemetryConfig::default()
    })
}

#[cfg(test)]
mod monitoring_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_samples_on_interval() {
        let collector = create_collector(HashMap::new());
        collector
            .register_source(queue_source(Arc::new(AtomicU64::new(4))))
            .await;

        collector
            .collect_baseline_metrics(Duration::from_millis(300))
            .await
            .unwrap();
        collector
            .start_chaos_monitoring(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(collector.is_monitoring().await);

        tokio::time::sleep(Duration::from_millis(950)).await;
        assert!(collector.stop_chaos_monitoring().await);
        assert!(!collector.stop_chaos_monitoring().await);

        // First tick is immediate, then one every 100ms
        let history = collector.get_history().await;
        assert_eq!(history.len(), 10);
        for pair in history.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(collector.get_history().await.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_preconditions() {
        let collector = create_collector(HashMap::new());
        collector
            .register_source(queue_source(Arc::new(AtomicU64::new(1))))
            .await;

        assert_eq!(
            collector
                .start_chaos_monitoring(Duration::from_millis(100))
                .await,
            Err(HarnessError::BaselineMissing)
        );

        collector
            .collect_baseline_metrics(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(
            collector.start_chaos_monitoring(Duration::ZERO).await,
            Err(HarnessError::InvalidArgument { .. })
        ));

        collector
            .start_chaos_monitoring(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(
            collector
                .start_chaos_monitoring(Duration::from_millis(100))
                .await,
            Err(HarnessError::MonitoringActive)
        );
        assert_eq!(
            collector
                .collect_baseline_metrics(Duration::from_millis(100))
                .await,
            Err(HarnessError::MonitoringActive)
        );

        collector.stop_chaos_monitoring().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let collector = TelemetryCollector::new(TelemetryConfig {
            max_data_points: 5,
            ..TelemetryConfig::default()
        });
        collector
            .register_source(queue_source(Arc::new(AtomicU64::new(0))))
            .await;

        for _ in 0..8 {
            collector.sample_now().await;
        }

        assert_eq!(collector.get_history().await.len(), 5);
        assert_eq!(collector.generate_telemetry_report().await.total_samples, 8);
    }
}

#[cfg(test)]
mod anomaly_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_injected_failure_raises_anomaly() {
        let harness = Arc::new(ChaosHarness::new(ChaosConfig::default()));
        harness.start().await;

        let collector = create_collector(HashMap::from([(
            "active_failures".to_string(),
            MetricThreshold::max(0.5),
        )]));
        collector
            .register_source(Arc::new(HarnessMetricSource::new(Arc::clone(&harness))))
            .await;
        collector
            .collect_baseline_metrics(Duration::from_millis(200))
            .await
            .unwrap();

        let quiet = collector.sample_now().await;
        assert!(quiet.anomalies.is_empty());

        harness
            .inject_failure(
                FailureOptions::new(
                    FailureType::NetworkPartition,
                    "api",
                    Duration::from_secs(1),
                )
                .with_severity(5),
            )
            .await;
        let event_id = collector
            .register_chaos_event("network_partition", "api")
            .await;

        let snapshot = collector.sample_now().await;
        assert_eq!(snapshot.metrics["active_failures"], 1.0);
        assert_eq!(snapshot.metrics["max_failure_severity"], 5.0);
        assert_eq!(snapshot.active_events, vec![event_id.clone()]);

        assert_eq!(snapshot.anomalies.len(), 1);
        let anomaly = &snapshot.anomalies[0];
        assert_eq!(anomaly.metric, "active_failures");
        assert_eq!(anomaly.bound, ThresholdBound::Max);
        assert_eq!(anomaly.severity, Severity::Critical);

        harness.wait_for_recovery().await;
        assert!(collector.unregister_chaos_event(&event_id).await);
        assert!(collector.sample_now().await.anomalies.is_empty());

        let report = collector.generate_telemetry_report().await;
        assert_eq!(report.anomaly_count, 1);
        assert_eq!(report.anomalies_by_metric["active_failures"], 1);
        assert_eq!(report.anomalies_by_severity[&Severity::Critical], 1);
        assert_eq!(collector.get_anomalies().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lower_bound_threshold() {
        let depth = Arc::new(AtomicU64::new(10));
        let collector = create_collector(HashMap::new());
        collector.register_source(queue_source(Arc::clone(&depth))).await;
        collector
            .set_threshold("queue_depth", MetricThreshold::min(8.0))
            .await;

        assert!(collector.sample_now().await.anomalies.is_empty());

        depth.store(7, Ordering::SeqCst);
        let snapshot = collector.sample_now().await;
        assert_eq!(snapshot.anomalies.len(), 1);
        assert_eq!(snapshot.anomalies[0].bound, ThresholdBound::Min);
        // 1/8 below the bound
        assert_eq!(snapshot.anomalies[0].severity, Severity::Info);
    }
}

#[cfg(test)]
mod projection_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_report_compares_latest_with_baseline() {
        let depth = Arc::new(AtomicU64::new(10));
        let collector = create_collector(HashMap::new());
        collector.register_source(queue_source(Arc::clone(&depth))).await;

        let averages = collector
            .collect_baseline_metrics(Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(averages["queue_depth"], 10.0);
        assert_eq!(collector.baseline_samples().await.len(), 4);

        depth.store(30, Ordering::SeqCst);
        collector.sample_now().await;

        let report = collector.generate_telemetry_report().await;
        assert_eq!(report.baseline["queue_depth"], 10.0);
        assert_eq!(report.latest["queue_depth"], 30.0);

        let delta = &report.deltas[0];
        assert_eq!(delta.metric, "queue_depth");
        assert_eq!(delta.delta, 20.0);
        assert_eq!(delta.deviation_pct, 200.0);
        assert_eq!(delta.drift, Some(TriggerLevel::Critical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeline_filters_metrics_and_marks_events() {
        let collector = create_collector(HashMap::new());
        collector
            .register_source(queue_source(Arc::new(AtomicU64::new(3))))
            .await;
        collector
            .register_source(Arc::new(FnMetricSource::new("workers", || {
                Metrics::from([("busy_workers".to_string(), 2.0)])
            })))
            .await;

        collector.sample_now().await;
        let event_id = collector.register_chaos_event("latency", "search").await;
        collector.sample_now().await;

        let timeline = collector
            .generate_chaos_timeline_visualization(&["busy_workers"])
            .await;
        assert_eq!(timeline.metrics, vec!["busy_workers".to_string()]);
        assert_eq!(timeline.points.len(), 2);
        for point in &timeline.points {
            assert_eq!(point.values.len(), 1);
            assert_eq!(point.values["busy_workers"], 2.0);
        }
        assert!(timeline.points[0].events.is_empty());
        assert_eq!(timeline.points[1].events, vec![event_id]);
        assert_eq!(timeline.events.len(), 1);

        let all = collector.generate_chaos_timeline_visualization(&[]).await;
        assert_eq!(
            all.metrics,
            vec!["busy_workers".to_string(), "queue_depth".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_drops_everything() {
        let collector = create_collector(HashMap::new());
        collector
            .register_source(queue_source(Arc::new(AtomicU64::new(1))))
            .await;
        collector
            .collect_baseline_metrics(Duration::from_millis(100))
            .await
            .unwrap();
        collector
            .start_chaos_monitoring(Duration::from_millis(50))
            .await
            .unwrap();
        collector.register_chaos_event("timeout", "auth").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        collector.reset().await;

        assert!(!collector.is_monitoring().await);
        assert!(collector.baseline().await.is_none());
        assert!(collector.get_history().await.is_empty());
        assert!(collector.chaos_events().await.is_empty());
    }
}
