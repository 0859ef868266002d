//! Failure injection engine.
//!
//! [`ChaosHarness`] tracks time-bounded failures against named targets.
//! Each accepted injection spawns a recovery task that removes it from the
//! active set once its duration elapses. Recovery tasks are never cancelled;
//! a task firing after `stop`/`cleanup` finds its entry gone and does nothing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::ChaosConfig;
use crate::dispatcher::FaultSource;

// ============================================================================
// Types
// ============================================================================

/// Failure mode simulated against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Target stops answering
    ServiceOutage,
    /// Target answers slowly
    Latency,
    /// Requests to the target time out
    Timeout,
    /// Target runs out of a resource (connections, memory)
    ResourceExhaustion,
    /// Target is unreachable from the caller
    NetworkPartition,
}

impl FailureType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::ServiceOutage => "service_outage",
            FailureType::Latency => "latency",
            FailureType::Timeout => "timeout",
            FailureType::ResourceExhaustion => "resource_exhaustion",
            FailureType::NetworkPartition => "network_partition",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "service_outage" | "outage" => Ok(FailureType::ServiceOutage),
            "latency" => Ok(FailureType::Latency),
            "timeout" => Ok(FailureType::Timeout),
            "resource_exhaustion" => Ok(FailureType::ResourceExhaustion),
            "network_partition" => Ok(FailureType::NetworkPartition),
            _ => Err(format!("Unknown failure type: {}", s)),
        }
    }
}

/// Request to inject a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureOptions {
    /// Failure mode
    pub failure_type: FailureType,
    /// Target component
    pub target: String,
    /// How long the failure stays active (milliseconds)
    pub duration_ms: u64,
    /// Severity 1-5; the configured default when absent
    #[serde(default)]
    pub severity: Option<u8>,
}

impl FailureOptions {
    /// Create options with the default severity.
    pub fn new(failure_type: FailureType, target: impl Into<String>, duration: Duration) -> Self {
        Self {
            failure_type,
            target: target.into(),
            duration_ms: duration.as_millis() as u64,
            severity: None,
        }
    }

    /// Set an explicit severity.
    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// An injected failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInjection {
    /// Unique ID
    pub id: String,
    /// Failure mode
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    /// Target component
    pub target: String,
    /// Severity 1-5
    pub severity: u8,
    /// When the failure started
    pub started_at: DateTime<Utc>,
    /// Declared duration (milliseconds)
    pub duration_ms: u64,
    /// Whether the failure is still in effect
    pub active: bool,
    /// When the failure was cleared (recovery or stop)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Why an injection was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// `start` has not been called, or the harness was stopped
    NotRunning,
    /// The concurrency cap is saturated
    CapacityReached {
        /// Active failures at the time of the request
        active: usize,
        /// Configured maximum
        max: usize,
    },
    /// A failure of the same type is already active on the target
    AlreadyActive {
        /// ID of the active failure
        existing_id: String,
    },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NotRunning => write!(f, "harness not running"),
            RejectionReason::CapacityReached { active, max } => {
                write!(f, "concurrency cap reached ({}/{})", active, max)
            }
            RejectionReason::AlreadyActive { existing_id } => {
                write!(f, "failure already active ({})", existing_id)
            }
        }
    }
}

/// Result of [`ChaosHarness::inject_failure`].
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionOutcome {
    /// The failure is now active
    Injected(FailureInjection),
    /// The request was a no-op
    Rejected(RejectionReason),
}

impl InjectionOutcome {
    /// Whether the failure was injected.
    pub fn is_injected(&self) -> bool {
        matches!(self, InjectionOutcome::Injected(_))
    }

    /// The injected failure, if any.
    pub fn injection(&self) -> Option<&FailureInjection> {
        match self {
            InjectionOutcome::Injected(injection) => Some(injection),
            InjectionOutcome::Rejected(_) => None,
        }
    }
}

// ============================================================================
// Dependency Map
// ============================================================================

/// Declared sub-components of the well-known targets.
pub fn default_dependencies() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 5] = [
        ("api", &["database", "auth", "rate_limiter"]),
        ("auth", &["database", "session_store", "token_service"]),
        ("database", &["connection_pool", "query_cache", "replica"]),
        (
            "intent_dispatcher",
            &["intent_store", "circuit_breaker", "session_history"],
        ),
        ("search", &["search_index", "database"]),
    ];

    entries
        .iter()
        .map(|(target, deps)| {
            (
                target.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        })
        .collect()
}

// ============================================================================
// ChaosHarness
// ============================================================================

type FailureKey = (FailureType, String);

#[derive(Debug, Default)]
struct HarnessState {
    running: bool,
    active: HashMap<FailureKey, FailureInjection>,
    history: VecDeque<FailureInjection>,
}

impl HarnessState {
    fn close(&mut self, id: &str, ended_at: DateTime<Utc>) {
        if let Some(entry) = self.history.iter_mut().find(|entry| entry.id == id) {
            entry.active = false;
            entry.ended_at = Some(ended_at);
        }
    }
}

/// Failure injection engine.
///
/// # Example
///
/// ```rust,ignore
/// let harness = ChaosHarness::new(config.chaos.clone());
/// harness.start().await;
///
/// let outcome = harness
///     .inject_failure(FailureOptions::new(FailureType::ServiceOutage, "database", Duration::from_secs(5)).with_severity(4))
///     .await;
/// assert!(outcome.is_injected());
///
/// harness.wait_for_recovery().await;
/// assert!(harness.active_failures().await.is_empty());
/// ```
pub struct ChaosHarness {
    config: ChaosConfig,
    state: Arc<RwLock<HarnessState>>,
    pending: Arc<watch::Sender<usize>>,
    dependencies: BTreeMap<String, Vec<String>>,
}

impl ChaosHarness {
    /// Create a stopped harness with the default dependency map.
    pub fn new(config: ChaosConfig) -> Self {
        let (pending, _) = watch::channel(0usize);
        Self {
            config,
            state: Arc::new(RwLock::new(HarnessState::default())),
            pending: Arc::new(pending),
            dependencies: default_dependencies(),
        }
    }

    /// Replace the declared dependency map.
    pub fn with_dependencies(mut self, dependencies: BTreeMap<String, Vec<String>>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Accept injections.
    pub async fn start(&self) {
        self.state.write().await.running = true;
        info!(
            max_concurrent = self.config.max_concurrent_failures,
            "Chaos harness started"
        );
    }

    /// Refuse new injections and clear the active set.
    ///
    /// Scheduled recovery tasks still fire, against the cleared state.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        state.running = false;

        let now = Utc::now();
        let cleared: Vec<String> = state.active.drain().map(|(_, f)| f.id).collect();
        for id in &cleared {
            state.close(id, now);
        }
        info!(cleared = cleared.len(), "Chaos harness stopped");
    }

    /// Stop and forget the injection history.
    pub async fn cleanup(&self) {
        self.stop().await;
        self.state.write().await.history.clear();
        debug!("Chaos harness history cleared");
    }

    /// Whether injections are accepted.
    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Inject a failure.
    ///
    /// Rejected (logged, no state change) when the harness is not running,
    /// when the concurrency cap is reached, or when the same `(type, target)`
    /// is already active. Severity is clamped to 1-5.
    pub async fn inject_failure(&self, options: FailureOptions) -> InjectionOutcome {
        let mut state = self.state.write().await;

        if !state.running {
            warn!(
                failure_type = %options.failure_type,
                target_name = %options.target,
                "Injection rejected: harness not running"
            );
            return InjectionOutcome::Rejected(RejectionReason::NotRunning);
        }

        let active = state.active.len();
        if active >= self.config.max_concurrent_failures {
            warn!(
                failure_type = %options.failure_type,
                target_name = %options.target,
                active,
                max = self.config.max_concurrent_failures,
                "Injection rejected: concurrency cap reached"
            );
            return InjectionOutcome::Rejected(RejectionReason::CapacityReached {
                active,
                max: self.config.max_concurrent_failures,
            });
        }

        let key = (options.failure_type, options.target.clone());
        if let Some(existing) = state.active.get(&key) {
            warn!(
                failure_type = %options.failure_type,
                target_name = %options.target,
                existing_id = %existing.id,
                "Injection rejected: failure already active"
            );
            return InjectionOutcome::Rejected(RejectionReason::AlreadyActive {
                existing_id: existing.id.clone(),
            });
        }

        let requested = options.severity.unwrap_or(self.config.default_severity);
        let severity = requested.clamp(1, 5);
        if severity != requested {
            warn!(requested, clamped = severity, "Severity out of range, clamped");
        }

        let injection = FailureInjection {
            id: uuid::Uuid::new_v4().to_string(),
            failure_type: options.failure_type,
            target: options.target,
            severity,
            started_at: Utc::now(),
            duration_ms: options.duration_ms,
            active: true,
            ended_at: None,
        };
        state.active.insert(key.clone(), injection.clone());
        state.history.push_back(injection.clone());
        while state.history.len() > self.config.max_history.max(1) {
            state.history.pop_front();
        }
        drop(state);

        self.pending.send_modify(|pending| *pending += 1);
        self.schedule_recovery(key, injection.id.clone(), options.duration_ms);

        info!(
            injection_id = %injection.id,
            failure_type = %injection.failure_type,
            target_name = %injection.target,
            severity = injection.severity,
            duration_ms = injection.duration_ms,
            "Failure injected"
        );
        InjectionOutcome::Injected(injection)
    }

    fn schedule_recovery(&self, key: FailureKey, id: String, duration_ms: u64) {
        let state = Arc::clone(&self.state);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            {
                let mut state = state.write().await;
                let matches = state.active.get(&key).is_some_and(|f| f.id == id);
                if matches {
                    state.active.remove(&key);
                    state.close(&id, Utc::now());
                    info!(
                        injection_id = %id,
                        failure_type = %key.0,
                        target_name = %key.1,
                        "Failure recovered"
                    );
                } else {
                    debug!(injection_id = %id, "Recovery fired against cleared state");
                }
            }
            pending.send_modify(|pending| *pending = pending.saturating_sub(1));
        });
    }

    /// Wait until every scheduled recovery task has fired.
    pub async fn wait_for_recovery(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Number of recovery tasks that have not fired yet.
    pub fn pending_recoveries(&self) -> usize {
        *self.pending.borrow()
    }

    /// Currently active failures, oldest first.
    pub async fn active_failures(&self) -> Vec<FailureInjection> {
        let state = self.state.read().await;
        let mut active: Vec<FailureInjection> = state.active.values().cloned().collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Number of currently active failures.
    pub async fn active_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    /// Injections accepted since the last cleanup, oldest first.
    ///
    /// Holds at most `max_history` records.
    pub async fn injection_history(&self) -> Vec<FailureInjection> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Declared sub-components of every known target.
    pub fn analyze_dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.dependencies.clone()
    }

    /// Declared sub-components of one target.
    pub fn dependencies_of(&self, target: &str) -> Vec<String> {
        self.dependencies.get(target).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl FaultSource for ChaosHarness {
    /// The most disruptive active failure on `target`: hard failures before
    /// latency, then highest severity.
    async fn active_fault(&self, target: &str) -> Option<FailureInjection> {
        let state = self.state.read().await;
        state
            .active
            .values()
            .filter(|failure| failure.target == target)
            .max_by_key(|failure| (failure.failure_type != FailureType::Latency, failure.severity))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(max: usize) -> ChaosHarness {
        ChaosHarness::new(ChaosConfig {
            max_concurrent_failures: max,
            ..ChaosConfig::default()
        })
    }

    fn outage(target: &str, ms: u64) -> FailureOptions {
        FailureOptions::new(
            FailureType::ServiceOutage,
            target,
            Duration::from_millis(ms),
        )
    }

    #[tokio::test]
    async fn test_rejected_when_not_running() {
        let harness = harness(3);
        let outcome = harness.inject_failure(outage("database", 100)).await;
        assert_eq!(outcome, InjectionOutcome::Rejected(RejectionReason::NotRunning));
        assert_eq!(harness.active_count().await, 0);
        assert_eq!(harness.pending_recoveries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_is_never_exceeded() {
        let harness = harness(2);
        harness.start().await;

        assert!(harness.inject_failure(outage("a", 1000)).await.is_injected());
        assert!(harness.inject_failure(outage("b", 1000)).await.is_injected());
        let third = harness.inject_failure(outage("c", 1000)).await;
        assert_eq!(
            third,
            InjectionOutcome::Rejected(RejectionReason::CapacityReached { active: 2, max: 2 })
        );
        assert_eq!(harness.active_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_type_and_target_rejected() {
        let harness = harness(5);
        harness.start().await;

        assert!(harness.inject_failure(outage("api", 1000)).await.is_injected());
        let duplicate = harness.inject_failure(outage("api", 1000)).await;
        assert!(matches!(
            duplicate,
            InjectionOutcome::Rejected(RejectionReason::AlreadyActive { .. })
        ));

        let latency = FailureOptions::new(FailureType::Latency, "api", Duration::from_secs(1));
        assert!(harness.inject_failure(latency).await.is_injected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_severity_defaults_and_clamps() {
        let harness = harness(5);
        harness.start().await;

        let default = harness.inject_failure(outage("a", 10)).await;
        assert_eq!(default.injection().unwrap().severity, 3);

        let high = harness.inject_failure(outage("b", 10).with_severity(9)).await;
        assert_eq!(high.injection().unwrap().severity, 5);

        let low = harness.inject_failure(outage("c", 10).with_severity(0)).await;
        assert_eq!(low.injection().unwrap().severity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_evicts_oldest_beyond_cap() {
        let harness = ChaosHarness::new(ChaosConfig {
            max_concurrent_failures: 1,
            max_history: 3,
            ..ChaosConfig::default()
        });
        harness.start().await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            let outcome = harness.inject_failure(outage("database", 10)).await;
            ids.push(outcome.injection().unwrap().id.clone());
            harness.wait_for_recovery().await;
        }

        let history = harness.injection_history().await;
        let kept: Vec<&String> = history.iter().map(|entry| &entry.id).collect();
        assert_eq!(kept, ids.iter().skip(2).collect::<Vec<_>>());
        assert!(history.iter().all(|entry| !entry.active));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_removes_failure_after_duration() {
        let harness = harness(3);
        harness.start().await;
        harness.inject_failure(outage("database", 5000)).await;

        let start = tokio::time::Instant::now();
        harness.wait_for_recovery().await;
        assert!(start.elapsed() >= Duration::from_millis(5000));
        assert_eq!(harness.active_count().await, 0);

        let history = harness.injection_history().await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].active);
        assert!(history[0].ended_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_active_and_late_recovery_is_harmless() {
        let harness = harness(3);
        harness.start().await;
        harness.inject_failure(outage("database", 1000)).await;

        harness.stop().await;
        assert_eq!(harness.active_count().await, 0);
        assert!(!harness.inject_failure(outage("api", 10)).await.is_injected());
        assert_eq!(harness.pending_recoveries(), 1);

        harness.wait_for_recovery().await;
        assert_eq!(harness.pending_recoveries(), 0);
        assert_eq!(harness.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinjected_failure_survives_stale_recovery() {
        let harness = harness(3);
        harness.start().await;
        harness.inject_failure(outage("database", 1000)).await;

        harness.stop().await;
        harness.start().await;
        let second = harness.inject_failure(outage("database", 5000)).await;
        let second_id = second.injection().unwrap().id.clone();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let active = harness.active_failures().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_source_prefers_hard_failures() {
        let harness = harness(5);
        harness.start().await;
        harness
            .inject_failure(
                FailureOptions::new(FailureType::Latency, "search", Duration::from_secs(1))
                    .with_severity(5),
            )
            .await;
        assert_eq!(
            harness.active_fault("search").await.unwrap().failure_type,
            FailureType::Latency
        );

        harness
            .inject_failure(
                FailureOptions::new(FailureType::Timeout, "search", Duration::from_secs(1))
                    .with_severity(1),
            )
            .await;
        assert_eq!(
            harness.active_fault("search").await.unwrap().failure_type,
            FailureType::Timeout
        );
        assert!(harness.active_fault("database").await.is_none());
    }

    #[test]
    fn test_dependency_map_is_static() {
        let harness = harness(1);
        assert_eq!(
            harness.dependencies_of("database"),
            vec!["connection_pool", "query_cache", "replica"]
        );
        assert!(harness.dependencies_of("unknown").is_empty());
        assert!(harness.analyze_dependencies().contains_key("intent_dispatcher"));
    }

    #[test]
    fn test_failure_type_parse() {
        assert_eq!(
            "service_outage".parse::<FailureType>().unwrap(),
            FailureType::ServiceOutage
        );
        assert_eq!("LATENCY".parse::<FailureType>().unwrap(), FailureType::Latency);
        assert!("meteor".parse::<FailureType>().is_err());
    }
}
