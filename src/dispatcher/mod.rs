//! Intent store and circuit-breaker-gated dispatcher.
//!
//! The dispatcher is the simulated backend that chaos tests exercise. It
//! classifies free text into [`Intent`]s, stores them, and dispatches them
//! against a configurable failure rate. Every dispatch target has its own
//! [`CircuitBreaker`]; `dispatch_intent` uses the configured global target.
//!
//! # Dispatch pipeline
//!
//! ```text
//! lifecycle_check → circuit_check → intent_lookup → fault_check → latency → backend_call
//! ```
//!
//! Every stage traversed is appended to [`DispatchResult::trace`], and the
//! stage that decided the outcome is named in `dependency_tag`. Only
//! lifecycle violations are returned as `Err`; every other outcome is a
//! `DispatchResult` value.

pub mod circuit_breaker;
pub mod intent;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitState};
pub use intent::{
    classify_text, detect_conflict, split_compound, Intent, IntentConflict, IntentId,
    IntentStatus, IntentType,
};

use crate::chaos::{FailureInjection, FailureType};
use crate::config::{CircuitBreakerConfig, DispatcherConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::random::{RandomSource, SeededRandom, ThreadRandom};

/// Extra latency per severity level applied by an active `latency` failure.
pub const INJECTED_LATENCY_PER_SEVERITY_MS: u64 = 100;

// ============================================================================
// Dispatch Results
// ============================================================================

/// Machine-readable reason for a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchErrorCode {
    /// Breaker open (or forced open by a custom scenario)
    CircuitOpen,
    /// No stored intent with the requested id
    IntentNotFound,
    /// Random failure drawn from the configured failure rate
    SimulatedFailure,
    /// An injected failure is active on the dispatch target
    TargetUnavailable,
}

impl DispatchErrorCode {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            DispatchErrorCode::IntentNotFound => "INTENT_NOT_FOUND",
            DispatchErrorCode::SimulatedFailure => "SIMULATED_FAILURE",
            DispatchErrorCode::TargetUnavailable => "TARGET_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for DispatchErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Whether the dispatch succeeded
    pub success: bool,
    /// Human-readable outcome
    pub message: Option<String>,
    /// Failure reason, if any
    pub error: Option<DispatchErrorCode>,
    /// When the dispatch completed
    pub timestamp: DateTime<Utc>,
    /// Pipeline stages traversed, in order
    pub trace: Vec<String>,
    /// Subsystem that produced the outcome
    pub dependency_tag: String,
    /// Intent that was dispatched
    pub intent_id: IntentId,
    /// Target whose breaker gated the dispatch
    pub target: String,
    /// Wall time spent in the dispatch (milliseconds)
    pub duration_ms: u64,
}

/// Point-in-time dispatcher summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherTelemetry {
    /// Mean dispatch duration (milliseconds)
    pub avg_dispatch_time_ms: f64,
    /// Failed dispatches / total dispatches
    pub error_rate: f64,
    /// State of the global target's breaker
    pub circuit_state: CircuitState,
    /// Number of stored intents
    pub active_intents: usize,
    /// Number of sessions with stored history
    pub session_count: usize,
    /// Dispatches attempted since the last reset
    pub total_dispatches: u64,
}

/// Direct overrides applied by tests.
///
/// Fields left `None` keep their current value. `circuit_open: Some(true)`
/// forces every dispatch to fail with `CIRCUIT_OPEN` until cleared with
/// `Some(false)`; it does not touch the breakers' own state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOptions {
    /// Simulated failure probability (0.0 - 1.0)
    pub failure_rate: Option<f64>,
    /// Added latency (milliseconds)
    pub latency_ms: Option<u64>,
    /// Force the circuit open
    pub circuit_open: Option<bool>,
}

/// Lookup of failures currently injected against a target.
#[async_trait]
pub trait FaultSource: Send + Sync {
    /// Active failure on `target`, if any.
    async fn active_fault(&self, target: &str) -> Option<FailureInjection>;
}

// ============================================================================
// Half-Open Trial Guard
// ============================================================================

type BreakerMap = Arc<RwLock<HashMap<String, CircuitBreaker>>>;

/// Half-open trial slot held by an in-flight dispatch.
///
/// A dispatch future dropped before it records an outcome (caller timeout,
/// `select!`) would otherwise leave the breaker half-open with its only trial
/// claimed. Dropping the guard hands the slot back. Once an outcome is
/// recorded the release is a no-op: success closes the circuit and failure
/// bumps the open generation.
struct TrialGuard {
    breakers: BreakerMap,
    target: String,
    generation: Option<u64>,
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        let Some(generation) = self.generation.take() else {
            return;
        };
        let target = std::mem::take(&mut self.target);

        if let Ok(mut breakers) = self.breakers.try_write() {
            release_trial(&mut breakers, &target, generation);
            return;
        }

        let breakers = Arc::clone(&self.breakers);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut breakers = breakers.write().await;
                    release_trial(&mut breakers, &target, generation);
                });
            }
            Err(_) => warn!(
                target_name = %target,
                "No runtime to release abandoned half-open trial"
            ),
        }
    }
}

fn release_trial(breakers: &mut HashMap<String, CircuitBreaker>, target: &str, generation: u64) {
    if let Some(breaker) = breakers.get_mut(target) {
        breaker.release_trial(generation);
    }
}

// ============================================================================
// Dispatcher State
// ============================================================================

#[derive(Debug, Default)]
struct DispatchMetrics {
    total: u64,
    failed: u64,
    total_duration_ms: f64,
}

struct DispatcherState {
    initialized: bool,
    enabled: bool,
    intents: HashMap<IntentId, Intent>,
    sessions: HashMap<String, Vec<Intent>>,
    failure_rate: f64,
    latency_ms: u64,
    circuit_override: bool,
    metrics: DispatchMetrics,
    fault_source: Option<Arc<dyn FaultSource>>,
}

impl DispatcherState {
    fn new(config: &DispatcherConfig) -> Self {
        Self {
            initialized: false,
            enabled: true,
            intents: HashMap::new(),
            sessions: HashMap::new(),
            failure_rate: config.failure_rate,
            latency_ms: config.latency_ms,
            circuit_override: false,
            metrics: DispatchMetrics::default(),
            fault_source: None,
        }
    }

    fn check_lifecycle(&self, operation: &str) -> HarnessResult<()> {
        if !self.initialized {
            return Err(HarnessError::not_initialized(operation));
        }
        if !self.enabled {
            return Err(HarnessError::disabled(operation));
        }
        Ok(())
    }

    fn insert(&mut self, intent: Intent) {
        self.intents.insert(intent.id.clone(), intent);
    }
}

// ============================================================================
// IntentDispatcher
// ============================================================================

/// Intent store plus circuit-breaker-gated dispatcher.
///
/// # Example
///
/// ```rust,ignore
/// let dispatcher = IntentDispatcher::new(config.dispatcher.clone(), config.circuit_breaker.clone());
/// dispatcher.initialize().await;
///
/// let intent = dispatcher.process_text("delete all documents").await?;
/// let result = dispatcher.dispatch_intent(&intent.id).await?;
/// if !result.success {
///     // render graceful degradation
/// }
/// ```
pub struct IntentDispatcher {
    config: DispatcherConfig,
    breaker_config: CircuitBreakerConfig,
    state: Arc<RwLock<DispatcherState>>,
    breakers: BreakerMap,
    random: Arc<dyn RandomSource>,
}

impl IntentDispatcher {
    /// Create a new, uninitialized dispatcher.
    pub fn new(config: DispatcherConfig, breaker_config: CircuitBreakerConfig) -> Self {
        let random: Arc<dyn RandomSource> = match config.rng_seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(ThreadRandom),
        };
        let state = DispatcherState::new(&config);

        Self {
            config,
            breaker_config,
            state: Arc::new(RwLock::new(state)),
            breakers: Arc::new(RwLock::new(HashMap::new())),
            random,
        }
    }

    /// Replace the random source used for simulated failures.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Route per-target dispatches through a source of injected failures.
    pub async fn attach_fault_source(&self, source: Arc<dyn FaultSource>) {
        self.state.write().await.fault_source = Some(source);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Mark the dispatcher ready for use.
    pub async fn initialize(&self) {
        let mut state = self.state.write().await;
        state.initialized = true;
        info!(
            global_target = %self.config.global_target,
            failure_rate = state.failure_rate,
            "Intent dispatcher initialized"
        );
    }

    /// Allow dispatch operations.
    pub async fn enable_harness(&self) {
        self.state.write().await.enabled = true;
        info!("Intent dispatcher enabled");
    }

    /// Reject dispatch operations until re-enabled.
    pub async fn disable_harness(&self) {
        self.state.write().await.enabled = false;
        info!("Intent dispatcher disabled");
    }

    /// Clear intents, sessions, metrics, breakers and scenario overrides.
    ///
    /// Lifecycle flags are kept.
    pub async fn reset(&self) {
        {
            let mut state = self.state.write().await;
            let fault_source = state.fault_source.take();
            let initialized = state.initialized;
            let enabled = state.enabled;
            *state = DispatcherState::new(&self.config);
            state.initialized = initialized;
            state.enabled = enabled;
            state.fault_source = fault_source;
        }
        self.breakers.write().await.clear();
        info!("Intent dispatcher reset");
    }

    /// Reset and return to the uninitialized state.
    pub async fn dispose(&self) {
        self.reset().await;
        self.state.write().await.initialized = false;
        info!("Intent dispatcher disposed");
    }

    /// Whether `initialize` has been called (and not disposed).
    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    /// Whether dispatch operations are enabled.
    pub async fn is_enabled(&self) -> bool {
        self.state.read().await.enabled
    }

    // ========================================================================
    // Intent Store
    // ========================================================================

    /// Classify `text` and store the resulting intent.
    pub async fn process_text(&self, text: &str) -> HarnessResult<Intent> {
        let mut state = self.state.write().await;
        state.check_lifecycle("process_text")?;

        let intent = Intent::classify(text);
        debug!(
            intent_id = %intent.id,
            intent_type = %intent.intent_type,
            confidence = intent.confidence,
            "Classified intent"
        );
        state.insert(intent.clone());
        Ok(intent)
    }

    /// Classify text that may hold several intents.
    ///
    /// Multi-segment text produces a `compound` parent owning one child per
    /// segment; single-segment text behaves like [`process_text`](Self::process_text).
    pub async fn process_compound_intent(&self, text: &str) -> HarnessResult<Intent> {
        let segments = split_compound(text);
        if segments.len() <= 1 {
            return self.process_text(text).await;
        }

        let mut state = self.state.write().await;
        state.check_lifecycle("process_compound_intent")?;

        let children: Vec<Intent> = segments.iter().map(|s| Intent::classify(s)).collect();
        let mut entities: Vec<String> = Vec::new();
        for child in &children {
            for entity in &child.entities {
                if !entities.contains(entity) {
                    entities.push(entity.clone());
                }
            }
        }

        let parent = Intent::compound(
            text,
            children.iter().map(|c| c.id.clone()).collect(),
            entities,
        );
        for child in children {
            state.insert(child.with_parent(parent.id.clone()));
        }
        state.insert(parent.clone());

        debug!(
            intent_id = %parent.id,
            children = parent.child_ids.len(),
            "Classified compound intent"
        );
        Ok(parent)
    }

    /// Get a stored intent.
    pub async fn get_intent(&self, id: &IntentId) -> HarnessResult<Option<Intent>> {
        let state = self.state.read().await;
        state.check_lifecycle("get_intent")?;
        Ok(state.intents.get(id).cloned())
    }

    /// All stored intents, oldest first.
    pub async fn get_all_intents(&self) -> HarnessResult<Vec<Intent>> {
        let state = self.state.read().await;
        state.check_lifecycle("get_all_intents")?;
        let mut intents: Vec<Intent> = state.intents.values().cloned().collect();
        intents.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(intents)
    }

    /// Delete an intent. Deleting a compound parent deletes the children it owns.
    ///
    /// Returns whether anything was removed.
    pub async fn delete_intent(&self, id: &IntentId) -> HarnessResult<bool> {
        let mut state = self.state.write().await;
        state.check_lifecycle("delete_intent")?;
        let Some(removed) = state.intents.remove(id) else {
            return Ok(false);
        };

        for child_id in &removed.child_ids {
            state.intents.remove(child_id);
        }
        if let Some(parent_id) = &removed.parent_id {
            if let Some(parent) = state.intents.get_mut(parent_id) {
                parent.child_ids.retain(|child| child != id);
            }
        }

        debug!(intent_id = %id, children = removed.child_ids.len(), "Deleted intent");
        Ok(true)
    }

    /// Conflicting pairs among stored intents.
    pub async fn find_conflicts(&self) -> HarnessResult<Vec<IntentConflict>> {
        let intents = self.get_all_intents().await?;
        let mut conflicts = Vec::new();
        for (i, a) in intents.iter().enumerate() {
            for b in intents.iter().skip(i + 1) {
                if let Some(conflict) = detect_conflict(a, b) {
                    conflicts.push(conflict);
                }
            }
        }
        Ok(conflicts)
    }

    // ========================================================================
    // Fault Knobs
    // ========================================================================

    /// Set the simulated failure probability.
    pub async fn set_failure_rate(&self, rate: f64) -> HarnessResult<()> {
        validate_rate(rate)?;
        self.state.write().await.failure_rate = rate;
        info!(failure_rate = rate, "Dispatcher failure rate set");
        Ok(())
    }

    /// Set the latency added to every dispatch.
    pub async fn set_latency(&self, latency_ms: u64) {
        self.state.write().await.latency_ms = latency_ms;
        info!(latency_ms, "Dispatcher latency set");
    }

    /// Apply explicit scenario overrides.
    pub async fn set_custom_scenario(&self, options: ScenarioOptions) -> HarnessResult<()> {
        if let Some(rate) = options.failure_rate {
            validate_rate(rate)?;
        }

        let mut state = self.state.write().await;
        if let Some(rate) = options.failure_rate {
            state.failure_rate = rate;
        }
        if let Some(latency) = options.latency_ms {
            state.latency_ms = latency;
        }
        if let Some(open) = options.circuit_open {
            state.circuit_override = open;
        }

        info!(
            failure_rate = state.failure_rate,
            latency_ms = state.latency_ms,
            circuit_override = state.circuit_override,
            "Custom dispatch scenario applied"
        );
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch an intent against the global target.
    pub async fn dispatch_intent(&self, id: &IntentId) -> HarnessResult<DispatchResult> {
        let target = self.config.global_target.clone();
        self.dispatch_intent_to(id, &target).await
    }

    /// Dispatch an intent against a named target.
    ///
    /// An active injected failure on `target` fails the dispatch with
    /// `TARGET_UNAVAILABLE`, except `latency` failures, which delay it by
    /// `severity × 100 ms`.
    pub async fn dispatch_intent_to(
        &self,
        id: &IntentId,
        target: &str,
    ) -> HarnessResult<DispatchResult> {
        let start = Instant::now();
        let mut trace = vec!["lifecycle_check".to_string()];

        let (intent_exists, failure_rate, latency_ms, circuit_override, fault_source) = {
            let state = self.state.read().await;
            state.check_lifecycle("dispatch_intent")?;
            (
                state.intents.contains_key(id),
                state.failure_rate,
                state.latency_ms,
                state.circuit_override,
                state.fault_source.clone(),
            )
        };

        trace.push("circuit_check".to_string());
        if circuit_override {
            let outcome = Outcome::failed(DispatchErrorCode::CircuitOpen, "scenario_override")
                .with_message("Circuit forced open by custom scenario");
            return Ok(self.finish(id, target, start, trace, outcome).await);
        }

        let (admitted, trial_generation) = {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers
                .entry(target.to_string())
                .or_insert_with(|| CircuitBreaker::new(target, self.breaker_config.clone()));
            let admitted = breaker.try_acquire();
            let trial = (admitted && breaker.state() == CircuitState::HalfOpen)
                .then(|| breaker.open_generation());
            (admitted, trial)
        };
        let _trial = TrialGuard {
            breakers: Arc::clone(&self.breakers),
            target: target.to_string(),
            generation: trial_generation,
        };
        if !admitted {
            let outcome = Outcome::failed(DispatchErrorCode::CircuitOpen, "circuit_breaker")
                .with_message(format!("Circuit for {} is open", target));
            return Ok(self.finish(id, target, start, trace, outcome).await);
        }

        trace.push("intent_lookup".to_string());
        if !intent_exists {
            self.record_breaker_failure(target).await;
            let outcome = Outcome::failed(DispatchErrorCode::IntentNotFound, "intent_store")
                .with_message(format!("Intent {} not found", id));
            return Ok(self.finish(id, target, start, trace, outcome).await);
        }

        if let Some(source) = fault_source {
            trace.push("fault_check".to_string());
            if let Some(fault) = source.active_fault(target).await {
                if fault.failure_type == FailureType::Latency {
                    trace.push("injected_latency".to_string());
                    let delay = u64::from(fault.severity) * INJECTED_LATENCY_PER_SEVERITY_MS;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                } else {
                    self.record_breaker_failure(target).await;
                    let outcome =
                        Outcome::failed(DispatchErrorCode::TargetUnavailable, target).with_message(
                            format!("{} failure active on {}", fault.failure_type, target),
                        );
                    return Ok(self.finish(id, target, start, trace, outcome).await);
                }
            }
        }

        if latency_ms > 0 {
            trace.push("latency".to_string());
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        trace.push("backend_call".to_string());
        let outcome = if self.random.chance(failure_rate) {
            self.record_breaker_failure(target).await;
            Outcome::failed(DispatchErrorCode::SimulatedFailure, "simulated_backend")
                .with_message("Simulated backend failure")
        } else {
            if let Some(breaker) = self.breakers.write().await.get_mut(target) {
                breaker.record_success();
            }
            Outcome::succeeded(format!("Intent {} dispatched", id))
        };

        Ok(self.finish(id, target, start, trace, outcome).await)
    }

    async fn record_breaker_failure(&self, target: &str) {
        let generation = {
            let mut breakers = self.breakers.write().await;
            breakers
                .get_mut(target)
                .and_then(|breaker| breaker.record_failure())
        };
        if let Some(generation) = generation {
            self.schedule_half_open(target.to_string(), generation);
        }
    }

    /// Deferred OPEN → HALF_OPEN transition once the cool-down elapses.
    fn schedule_half_open(&self, target: String, generation: u64) {
        let breakers = Arc::clone(&self.breakers);
        let cooldown = self.breaker_config.cooldown();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let mut breakers = breakers.write().await;
            if let Some(breaker) = breakers.get_mut(&target) {
                if breaker.enter_half_open(generation) {
                    debug!(target_name = %target, "Cool-down elapsed, circuit half-open");
                }
            }
        });
    }

    async fn finish(
        &self,
        id: &IntentId,
        target: &str,
        start: Instant,
        trace: Vec<String>,
        outcome: Outcome,
    ) -> DispatchResult {
        let duration = start.elapsed();
        let mut state = self.state.write().await;

        state.metrics.total += 1;
        state.metrics.total_duration_ms += duration.as_secs_f64() * 1000.0;
        if !outcome.success {
            state.metrics.failed += 1;
        }
        if let Some(intent) = state.intents.get_mut(id) {
            intent.status = if outcome.success {
                IntentStatus::Dispatched
            } else {
                IntentStatus::Failed
            };
        }

        if let Some(code) = outcome.error {
            warn!(
                intent_id = %id,
                target_name = %target,
                error = %code,
                dependency = %outcome.dependency_tag,
                "Dispatch failed"
            );
        } else {
            debug!(intent_id = %id, target_name = %target, "Dispatch succeeded");
        }

        DispatchResult {
            success: outcome.success,
            message: outcome.message,
            error: outcome.error,
            timestamp: Utc::now(),
            trace,
            dependency_tag: outcome.dependency_tag,
            intent_id: id.clone(),
            target: target.to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Append a stored intent to a session's history.
    pub async fn store_intent(&self, id: &IntentId, session_id: &str) -> HarnessResult<()> {
        let mut state = self.state.write().await;
        state.check_lifecycle("store_intent")?;

        let intent = state
            .intents
            .get(id)
            .cloned()
            .ok_or_else(|| HarnessError::IntentNotFound {
                intent_id: id.to_string(),
            })?;
        state
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push(intent);
        Ok(())
    }

    /// Intents stored for a session, in insertion order.
    pub async fn get_session_history(&self, session_id: &str) -> HarnessResult<Vec<Intent>> {
        let state = self.state.read().await;
        state.check_lifecycle("get_session_history")?;
        Ok(state.sessions.get(session_id).cloned().unwrap_or_default())
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Point-in-time dispatcher summary.
    pub async fn get_telemetry_data(&self) -> DispatcherTelemetry {
        let circuit_state = self.circuit_state(&self.config.global_target).await;
        let state = self.state.read().await;
        let metrics = &state.metrics;

        let (avg, error_rate) = if metrics.total == 0 {
            (0.0, 0.0)
        } else {
            (
                metrics.total_duration_ms / metrics.total as f64,
                metrics.failed as f64 / metrics.total as f64,
            )
        };

        DispatcherTelemetry {
            avg_dispatch_time_ms: avg,
            error_rate,
            circuit_state: if state.circuit_override {
                CircuitState::Open
            } else {
                circuit_state
            },
            active_intents: state.intents.len(),
            session_count: state.sessions.len(),
            total_dispatches: metrics.total,
        }
    }

    /// Breaker state for a target (`CLOSED` if it has never been dispatched to).
    pub async fn circuit_state(&self, target: &str) -> CircuitState {
        self.breakers
            .read()
            .await
            .get(target)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshots of every breaker, sorted by target.
    pub async fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        let breakers = self.breakers.read().await;
        let mut states: Vec<CircuitBreakerState> =
            breakers.values().map(|breaker| breaker.snapshot()).collect();
        states.sort_by(|a, b| a.target.cmp(&b.target));
        states
    }

    /// The target used by [`dispatch_intent`](Self::dispatch_intent).
    pub fn global_target(&self) -> &str {
        &self.config.global_target
    }
}

fn validate_rate(rate: f64) -> HarnessResult<()> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(HarnessError::invalid(
            "failure_rate",
            format!("must be within [0, 1], got {}", rate),
        ))
    }
}

struct Outcome {
    success: bool,
    error: Option<DispatchErrorCode>,
    dependency_tag: String,
    message: Option<String>,
}

impl Outcome {
    fn succeeded(message: String) -> Self {
        Self {
            success: true,
            error: None,
            dependency_tag: "dispatcher".to_string(),
            message: Some(message),
        }
    }

    fn failed(code: DispatchErrorCode, dependency_tag: &str) -> Self {
        Self {
            success: false,
            error: Some(code),
            dependency_tag: dependency_tag.to_string(),
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SequenceRandom;

    fn dispatcher() -> IntentDispatcher {
        IntentDispatcher::new(DispatcherConfig::default(), CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let dispatcher = dispatcher();
        let err = dispatcher.process_text("delete notes").await.unwrap_err();
        assert!(matches!(err, HarnessError::NotInitialized { .. }));

        let err = dispatcher
            .dispatch_intent(&IntentId::from("missing"))
            .await
            .unwrap_err();
        assert!(err.is_lifecycle());
    }

    #[tokio::test]
    async fn test_disabled_rejects_dispatch() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;
        let intent = dispatcher.process_text("open settings").await.unwrap();

        dispatcher.disable_harness().await;
        let err = dispatcher.dispatch_intent(&intent.id).await.unwrap_err();
        assert!(matches!(err, HarnessError::Disabled { .. }));

        dispatcher.enable_harness().await;
        assert!(dispatcher.dispatch_intent(&intent.id).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_successful_dispatch_trace() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;
        let intent = dispatcher.process_text("search invoices").await.unwrap();

        let result = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.error, None);
        assert_eq!(result.dependency_tag, "dispatcher");
        assert_eq!(
            result.trace,
            vec!["lifecycle_check", "circuit_check", "intent_lookup", "backend_call"]
        );
        assert_eq!(
            dispatcher.get_intent(&intent.id).await.unwrap().unwrap().status,
            IntentStatus::Dispatched
        );
    }

    #[tokio::test]
    async fn test_simulated_failure_uses_random_source() {
        let dispatcher = dispatcher().with_random(Arc::new(SequenceRandom::new([0.2, 0.6])));
        dispatcher.initialize().await;
        dispatcher.set_failure_rate(0.5).await.unwrap();
        let intent = dispatcher.process_text("list orders").await.unwrap();

        let first = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert_eq!(first.error, Some(DispatchErrorCode::SimulatedFailure));
        assert_eq!(first.dependency_tag, "simulated_backend");

        let second = dispatcher.dispatch_intent(&intent.id).await.unwrap();
        assert!(second.success);
    }

    #[tokio::test]
    async fn test_set_failure_rate_validates_range() {
        let dispatcher = dispatcher();
        assert!(dispatcher.set_failure_rate(1.2).await.is_err());
        assert!(dispatcher.set_failure_rate(-0.1).await.is_err());
        assert!(dispatcher.set_failure_rate(f64::NAN).await.is_err());
        assert!(dispatcher.set_failure_rate(1.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_scenario_override_forces_circuit_open() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;
        let intent = dispatcher.process_text("sort by date").await.unwrap();

        dispatcher
            .set_custom_scenario(ScenarioOptions {
                circuit_open: Some(true),
                ..Default::default()
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
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(dispatcher.dispatch_intent(&intent.id).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_compound_intent_owns_children() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;

        let parent = dispatcher
            .process_compound_intent("create a note and then open settings")
            .await
            .unwrap();
        assert_eq!(parent.intent_type, IntentType::Compound);
        assert_eq!(parent.child_ids.len(), 2);

        let first_child = dispatcher
            .get_intent(&parent.child_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_child.intent_type, IntentType::Create);
        assert_eq!(first_child.parent_id.as_ref(), Some(&parent.id));
        assert_eq!(dispatcher.get_all_intents().await.unwrap().len(), 3);

        assert!(dispatcher.delete_intent(&parent.id).await.unwrap());
        assert!(dispatcher.get_all_intents().await.unwrap().is_empty());
        assert!(!dispatcher.delete_intent(&parent.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_single_segment_compound_is_plain_intent() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;
        let intent = dispatcher.process_compound_intent("search logs").await.unwrap();
        assert_eq!(intent.intent_type, IntentType::Search);
        assert!(intent.child_ids.is_empty());
    }

    #[tokio::test]
    async fn test_session_history_is_append_only() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;
        let a = dispatcher.process_text("create report").await.unwrap();
        let b = dispatcher.process_text("update report").await.unwrap();

        dispatcher.store_intent(&a.id, "session-1").await.unwrap();
        dispatcher.store_intent(&b.id, "session-1").await.unwrap();
        dispatcher.store_intent(&a.id, "session-1").await.unwrap();

        let history = dispatcher.get_session_history("session-1").await.unwrap();
        let ids: Vec<&IntentId> = history.iter().map(|i| &i.id).collect();
        assert_eq!(ids, vec![&a.id, &b.id, &a.id]);
        assert!(dispatcher
            .get_session_history("other")
            .await
            .unwrap()
            .is_empty());

        let err = dispatcher
            .store_intent(&IntentId::from("nope"), "session-1")
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::IntentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_conflicts() {
        let dispatcher = dispatcher();
        dispatcher.initialize().await;
        dispatcher.process_text("delete all documents").await.unwrap();
        dispatcher.process_text("save all documents").await.unwrap();
        dispatcher.process_text("search photos").await.unwrap();

        let conflicts = dispatcher.find_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].shared_entities, vec!["documents".to_string()]);
    }

    #[tokio::test]
    async fn test_telemetry_and_reset() {
        let dispatcher = dispatcher().with_random(Arc::new(SequenceRandom::new([0.0, 0.9])));
        dispatcher.initialize().await;
        dispatcher.set_failure_rate(0.5).await.unwrap();
        let intent = dispatcher.process_text("get profile").await.unwrap();
        dispatcher.store_intent(&intent.id, "s").await.unwrap();

        dispatcher.dispatch_intent(&intent.id).await.unwrap();
        dispatcher.dispatch_intent(&intent.id).await.unwrap();

        let telemetry = dispatcher.get_telemetry_data().await;
        assert_eq!(telemetry.total_dispatches, 2);
        assert_eq!(telemetry.error_rate, 0.5);
        assert_eq!(telemetry.active_intents, 1);
        assert_eq!(telemetry.session_count, 1);

        dispatcher.reset().await;
        let telemetry = dispatcher.get_telemetry_data().await;
        assert_eq!(telemetry.total_dispatches, 0);
        assert_eq!(telemetry.active_intents, 0);
        assert!(dispatcher.is_initialized().await);

        dispatcher.dispose().await;
        assert!(!dispatcher.is_initialized().await);
    }
}
