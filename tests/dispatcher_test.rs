//! Integration tests for the intent dispatcher
//!
//! Exercises the circuit breaker lifecycle, injected faults routed through a
//! live `ChaosHarness`, and the intent store through the public API only.
//! Time-dependent tests run on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use chaos_harness::chaos::{ChaosHarness, FailureOptions, FailureType};
use chaos_harness::config::{ChaosConfig, CircuitBreakerConfig, DispatcherConfig};
use chaos_harness::dispatcher::{
    CircuitState, DispatchErrorCode, FaultSource, IntentDispatcher, IntentId, IntentType,
    ScenarioOptions,
};
use chaos_harness::random::SequenceRandom;
use tokio_test::{assert_err, assert_ok};

/// Dispatcher with default breaker settings and a scripted random source.
async fn create_dispatcher(failure_rate: f64, draws: Vec<f64>) -> IntentDispatcher {
    let config = DispatcherConfig {
        failure_rate,
        ..DispatcherConfig::default()
    };
    let dispatcher = IntentDispatcher::new(config, CircuitBreakerConfig::default())
        .with_random(Arc::new(SequenceRandom::new(draws)));
    dispatcher.initialize().await;
    dispatcher
}

#[cfg(test)]
mod circuit_breaker_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_three_failures() {
        let dispatcher = create_dispatcher(1.0, vec![]).await;
        let intent = dispatcher.process_text("search the archive").await.unwrap();

        for _ in 0..3 {
            let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
            assert!(!result.success);
            assert_eq!(result.error, Some(DispatchErrorCode::SimulatedFailure));
            assert_eq!(result.dependency_tag, "simulated_backend");
        }
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::Open
        );

        // Open circuit fails fast without reaching the backend
        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert_eq!(result.error, Some(DispatchErrorCode::CircuitOpen));
        assert_eq!(result.dependency_tag, "circuit_breaker");
        assert_eq!(result.trace, vec!["lifecycle_check", "circuit_check"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes_circuit() {
        let dispatcher = create_dispatcher(1.0, vec![]).await;
        let intent = dispatcher.process_text("create a new report").await.unwrap();

        for _ in 0..3 {
            dispatcher.dispatch_intent(&intent.id).await.unwrap();
        }
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::Open
        );

        tokio::time::sleep(Duration::from_millis(10_001)).await;
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::HalfOpen
        );

        dispatcher.set_failure_rate(0.0).await.unwrap();
        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert!(result.success);
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens_circuit() {
        let dispatcher = create_dispatcher(1.0, vec![]).await;
        let intent = dispatcher.process_text("update my profile").await.unwrap();

        for _ in 0..3 {
            dispatcher.dispatch_intent(&intent.id).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10_001)).await;

        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert!(!result.success);
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_trial_is_released() {
        let dispatcher = create_dispatcher(1.0, vec![]).await;
        let intent = dispatcher.process_text("open the dashboard").await.unwrap();

        for _ in 0..3 {
            dispatcher.dispatch_intent(&intent.id).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10_001)).await;

        // Trial dispatch is abandoned by the caller mid-latency
        dispatcher.set_failure_rate(0.0).await.unwrap();
        dispatcher.set_latency(1_000).await;
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            dispatcher.dispatch_intent(&intent.id),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::HalfOpen
        );

        dispatcher.set_latency(0).await;
        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert!(result.success);
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_intent_counts_toward_breaker() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let missing = IntentId::from("missing-intent");

        for _ in 0..3 {
            let result = dispatcher.dispatch_intent(&missing).await.unwrap();
            assert_eq!(result.error, Some(DispatchErrorCode::IntentNotFound));
            assert_eq!(result.dependency_tag, "intent_store");
        }

        let result = dispatcher.dispatch_intent(&missing).await.unwrap();
        assert_eq!(result.error, Some(DispatchErrorCode::CircuitOpen));
        assert_eq!(
            dispatcher.circuit_state(dispatcher.global_target()).await,
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_isolated_per_target() {
        let dispatcher = create_dispatcher(1.0, vec![]).await;
        let intent = dispatcher.process_text("read the logs").await.unwrap();

        for _ in 0..3 {
            dispatcher.dispatch_intent_to(&intent.id, "search").await.unwrap();
        }

        assert_eq!(dispatcher.circuit_state("search").await, CircuitState::Open);
        assert_eq!(dispatcher.circuit_state("auth").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_forced_open_scenario_overrides_breaker() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let intent = dispatcher.process_text("search documents").await.unwrap();

        dispatcher
            .set_custom_scenario(ScenarioOptions {
                circuit_open: Some(true),
                ..ScenarioOptions::default()
            })
            .await
            .unwrap();

        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert_eq!(result.error, Some(DispatchErrorCode::CircuitOpen));
        assert_eq!(result.dependency_tag, "scenario_override");
        assert_eq!(
            dispatcher.get_telemetry_data().await.circuit_state,
            CircuitState::Open
        );

        dispatcher
            .set_custom_scenario(ScenarioOptions {
                circuit_open: Some(false),
                ..ScenarioOptions::default()
            })
            .await
            .unwrap();
        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert!(result.success);
    }
}

#[cfg(test)]
mod fault_source_tests {
    use super::*;

    async fn create_wired() -> (IntentDispatcher, Arc<ChaosHarness>) {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let harness = Arc::new(ChaosHarness::new(ChaosConfig::default()));
        harness.start().await;
        dispatcher
            .attach_fault_source(Arc::clone(&harness) as Arc<dyn FaultSource>)
            .await;
        (dispatcher, harness)
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_fails_dispatch_until_recovery() {
        let (dispatcher, harness) = create_wired().await;
        let intent = dispatcher.process_text("search database").await.unwrap();

        let outcome = harness
            .inject_failure(
                FailureOptions::new(
                    FailureType::ServiceOutage,
                    "database",
                    Duration::from_millis(1_000),
                )
                .with_severity(4),
            )
            .await;
        assert!(outcome.is_injected());

        let result = dispatcher
            .dispatch_intent_to(&intent.id, "database")
            .await
            .unwrap();
        assert_eq!(result.error, Some(DispatchErrorCode::TargetUnavailable));
        assert_eq!(result.dependency_tag, "database");
        assert!(result.trace.contains(&"fault_check".to_string()));

        // Other targets are unaffected
        let result = dispatcher.dispatch_intent_to(&intent.id, "auth").await.unwrap();
        assert!(result.success);

        harness.wait_for_recovery().await;
        let result = dispatcher
            .dispatch_intent_to(&intent.id, "database")
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_fault_delays_dispatch() {
        let (dispatcher, harness) = create_wired().await;
        let intent = dispatcher.process_text("read settings").await.unwrap();

        harness
            .inject_failure(
                FailureOptions::new(FailureType::Latency, "api", Duration::from_millis(5_000))
                    .with_severity(3),
            )
            .await;

        let result = dispatcher.dispatch_intent_to(&intent.id, "api").await.unwrap();
        assert!(result.success);
        assert!(result.trace.contains(&"injected_latency".to_string()));
        assert!(result.duration_ms >= 300);
    }
}

#[cfg(test)]
mod intent_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_compound_intent_children_and_cascade_delete() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let parent = dispatcher
            .process_compound_intent("create a report and then delete the draft")
            .await
            .unwrap();

        assert_eq!(parent.intent_type, IntentType::Compound);
        assert_eq!(parent.child_ids.len(), 2);
        assert_eq!(dispatcher.get_all_intents().await.unwrap().len(), 3);

        for child_id in &parent.child_ids {
            let child = dispatcher.get_intent(child_id).await.unwrap().unwrap();
            assert_eq!(child.parent_id.as_ref(), Some(&parent.id));
        }

        assert!(dispatcher.delete_intent(&parent.id).await.unwrap());
        assert!(dispatcher.get_all_intents().await.unwrap().is_empty());
        assert!(!dispatcher.delete_intent(&parent.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_save_documents_conflict() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let delete = dispatcher.process_text("delete all documents").await.unwrap();
        let save = dispatcher.process_text("save all documents").await.unwrap();

        assert_eq!(delete.intent_type, IntentType::Delete);
        assert_ne!(save.intent_type, IntentType::Delete);

        let conflicts = dispatcher.find_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].delete_intent, delete.id);
        assert_eq!(conflicts[0].write_intent, save.id);
        assert_eq!(conflicts[0].shared_entities, vec!["documents".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_and_create_same_subject_conflict() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        dispatcher.process_text("delete the invoice").await.unwrap();
        dispatcher.process_text("create the invoice").await.unwrap();

        let conflicts = dispatcher.find_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
    }

    #[tokio::test]
    async fn test_session_history_and_unknown_intent() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let first = dispatcher.process_text("search orders").await.unwrap();
        let second = dispatcher.process_text("update order status").await.unwrap();

        dispatcher.store_intent(&first.id, "session-1").await.unwrap();
        dispatcher.store_intent(&second.id, "session-1").await.unwrap();

        let history = dispatcher.get_session_history("session-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert!(dispatcher
            .get_session_history("other")
            .await
            .unwrap()
            .is_empty());

        dispatcher.delete_intent(&first.id).await.unwrap();
        assert!(dispatcher.store_intent(&first.id, "session-1").await.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_gates() {
        let dispatcher = IntentDispatcher::new(
            DispatcherConfig::default(),
            CircuitBreakerConfig::default(),
        );
        let err = assert_err!(dispatcher.process_text("search").await);
        assert!(err.is_lifecycle());

        dispatcher.initialize().await;
        dispatcher.disable_harness().await;
        let err = assert_err!(dispatcher.process_text("search").await);
        assert!(err.is_lifecycle());

        dispatcher.enable_harness().await;
        let intent = assert_ok!(dispatcher.process_text("search").await);
        assert!(assert_ok!(dispatcher.dispatch_intent(&intent.id).await).success);
    }

    #[tokio::test]
    async fn test_store_reads_and_deletes_respect_lifecycle() {
        let dispatcher = create_dispatcher(0.0, vec![]).await;
        let intent = dispatcher.process_text("create an invoice").await.unwrap();
        dispatcher.store_intent(&intent.id, "session-1").await.unwrap();

        dispatcher.disable_harness().await;
        assert!(assert_err!(dispatcher.get_intent(&intent.id).await).is_lifecycle());
        assert!(assert_err!(dispatcher.get_all_intents().await).is_lifecycle());
        assert!(assert_err!(dispatcher.find_conflicts().await).is_lifecycle());
        assert!(assert_err!(dispatcher.get_session_history("session-1").await).is_lifecycle());
        assert!(assert_err!(dispatcher.delete_intent(&intent.id).await).is_lifecycle());

        // Rejected delete left the intent in place
        dispatcher.enable_harness().await;
        assert!(assert_ok!(dispatcher.get_intent(&intent.id).await).is_some());

        dispatcher.dispose().await;
        assert!(assert_err!(dispatcher.get_all_intents().await).is_lifecycle());
        assert!(assert_err!(dispatcher.delete_intent(&intent.id).await).is_lifecycle());
    }
}
