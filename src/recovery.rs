//! Recovery path validation.
//!
//! Each [`RecoveryPath`] documents how a component is supposed to recover:
//! a primary strategy, plus optional secondary and fallback strategies. The
//! validator injects a service outage on the component, waits the grace
//! period, then escalates through the declared stages. Each stage succeeds
//! with its own fixed probability, drawn from an injectable
//! [`RandomSource`].
//!
//! Outcomes are reported to the [`UxImpactTracker`]:
//!
//! | outcome              | severity      |
//! |----------------------|---------------|
//! | primary succeeded    | `MODERATE`    |
//! | secondary succeeded  | `SIGNIFICANT` |
//! | fallback succeeded   | `SEVERE`      |
//! | every stage failed   | `CRITICAL`    |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::chaos::{ChaosHarness, FailureOptions, FailureType, InjectionOutcome};
use crate::config::RecoveryConfig;
use crate::error::AppResult;
use crate::random::RandomSource;
use crate::storage::{ReportKind, ReportStore, StoredReport};
use crate::ux_impact::{UxImpactRecord, UxImpactTracker, UxSeverity};

/// Severity of the outage injected for each path.
const VALIDATION_SEVERITY: u8 = 4;

// ============================================================================
// Types
// ============================================================================

/// Documented recovery strategy for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPath {
    /// Component the path applies to
    pub component: String,
    /// First strategy tried
    pub primary: String,
    /// Strategy tried when the primary fails
    #[serde(default)]
    pub secondary: Option<String>,
    /// Last-resort strategy
    #[serde(default)]
    pub fallback: Option<String>,
    /// Documented recovery budget (milliseconds)
    pub expected_recovery_time_ms: u64,
}

impl RecoveryPath {
    /// Paths for the well-known components.
    pub fn defaults() -> Vec<RecoveryPath> {
        vec![
            RecoveryPath {
                component: "database".to_string(),
                primary: "reconnect_with_backoff".to_string(),
                secondary: Some("failover_to_replica".to_string()),
                fallback: Some("serve_from_cache".to_string()),
                expected_recovery_time_ms: 5_000,
            },
            RecoveryPath {
                component: "api".to_string(),
                primary: "retry_request".to_string(),
                secondary: Some("route_to_secondary_region".to_string()),
                fallback: Some("offline_mode".to_string()),
                expected_recovery_time_ms: 3_000,
            },
            RecoveryPath {
                component: "auth".to_string(),
                primary: "refresh_token".to_string(),
                secondary: None,
                fallback: Some("cached_session".to_string()),
                expected_recovery_time_ms: 2_000,
            },
            RecoveryPath {
                component: "search".to_string(),
                primary: "rebuild_index".to_string(),
                secondary: None,
                fallback: None,
                expected_recovery_time_ms: 10_000,
            },
        ]
    }
}

/// Escalation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    /// Primary strategy
    Primary,
    /// Secondary strategy
    Secondary,
    /// Fallback strategy
    Fallback,
}

impl RecoveryStage {
    /// UX severity reported when this stage restores service.
    pub fn success_severity(&self) -> UxSeverity {
        match self {
            RecoveryStage::Primary => UxSeverity::Moderate,
            RecoveryStage::Secondary => UxSeverity::Significant,
            RecoveryStage::Fallback => UxSeverity::Severe,
        }
    }
}

impl std::fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStage::Primary => write!(f, "primary"),
            RecoveryStage::Secondary => write!(f, "secondary"),
            RecoveryStage::Fallback => write!(f, "fallback"),
        }
    }
}

/// One attempted stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAttempt {
    /// Stage
    pub stage: RecoveryStage,
    /// Strategy name
    pub strategy: String,
    /// Whether the stage restored service
    pub succeeded: bool,
    /// Time from injection to the end of this attempt (milliseconds)
    pub recovery_time_ms: u64,
}

/// Observed outcome for one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathOutcome {
    /// Component validated
    pub component: String,
    /// Last stage attempted
    pub attempted_stage: RecoveryStage,
    /// Whether any stage restored service
    pub succeeded: bool,
    /// Time from injection to the final attempt (milliseconds)
    pub actual_recovery_time_ms: u64,
    /// Documented recovery budget (milliseconds)
    pub expected_recovery_time_ms: u64,
    /// Whether recovery succeeded inside the documented budget
    pub within_expected: bool,
    /// Every attempt, in escalation order
    pub attempts: Vec<StageAttempt>,
    /// Injected failure, if the harness accepted it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection_id: Option<String>,
    /// UX severity reported for this path
    pub ux_severity: UxSeverity,
}

impl PathOutcome {
    /// Stage that restored service, if any.
    pub fn recovered_by(&self) -> Option<RecoveryStage> {
        self.succeeded.then_some(self.attempted_stage)
    }
}

/// Aggregate over all validated paths.
///
/// `primary_success + secondary_success + fallback_success + complete_failure
/// == total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverySummary {
    /// Paths validated
    pub total: usize,
    /// Recovered by the primary strategy
    pub primary_success: usize,
    /// Recovered by the secondary strategy
    pub secondary_success: usize,
    /// Recovered by the fallback strategy
    pub fallback_success: usize,
    /// Every declared stage failed
    pub complete_failure: usize,
    /// Recovered paths / total
    pub success_rate: f64,
    /// Mean final-attempt recovery time (milliseconds)
    pub average_recovery_time_ms: f64,
}

impl RecoverySummary {
    /// Aggregate path outcomes.
    pub fn from_outcomes(outcomes: &[PathOutcome]) -> Self {
        let mut summary = RecoverySummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.recovered_by() {
                Some(RecoveryStage::Primary) => summary.primary_success += 1,
                Some(RecoveryStage::Secondary) => summary.secondary_success += 1,
                Some(RecoveryStage::Fallback) => summary.fallback_success += 1,
                None => summary.complete_failure += 1,
            }
        }
        if summary.total > 0 {
            let recovered = summary.total - summary.complete_failure;
            summary.success_rate = recovered as f64 / summary.total as f64;
            summary.average_recovery_time_ms = outcomes
                .iter()
                .map(|o| o.actual_recovery_time_ms as f64)
                .sum::<f64>()
                / summary.total as f64;
        }
        summary
    }
}

/// Structured verification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryVerificationReport {
    /// When validation finished
    pub generated_at: DateTime<Utc>,
    /// Aggregate statistics
    pub summary: RecoverySummary,
    /// Per-path detail
    pub paths: Vec<PathOutcome>,
    /// ID under which the report was persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

// ============================================================================
// Validator
// ============================================================================

/// Replays recovery paths against injected failures.
pub struct RecoveryPathValidator {
    config: RecoveryConfig,
    harness: Arc<ChaosHarness>,
    tracker: Arc<UxImpactTracker>,
    random: Arc<dyn RandomSource>,
    store: Option<Arc<dyn ReportStore>>,
}

impl RecoveryPathValidator {
    /// Create a validator without persistence.
    pub fn new(
        config: RecoveryConfig,
        harness: Arc<ChaosHarness>,
        tracker: Arc<UxImpactTracker>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            harness,
            tracker,
            random,
            store: None,
        }
    }

    /// Persist verification reports to `store`.
    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate one path.
    pub async fn validate_path(&self, path: &RecoveryPath) -> PathOutcome {
        let options = FailureOptions::new(
            FailureType::ServiceOutage,
            path.component.clone(),
            Duration::from_millis(self.config.failure_duration_ms),
        )
        .with_severity(VALIDATION_SEVERITY);

        let injection_id = match self.harness.inject_failure(options).await {
            InjectionOutcome::Injected(injection) => Some(injection.id),
            InjectionOutcome::Rejected(reason) => {
                warn!(
                    component = %path.component,
                    reason = %reason,
                    "Recovery validation running without an injected failure"
                );
                None
            }
        };

        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(self.config.grace_period_ms)).await;

        let stages = [
            (
                RecoveryStage::Primary,
                Some(&path.primary),
                self.config.primary_success_probability,
            ),
            (
                RecoveryStage::Secondary,
                path.secondary.as_ref(),
                self.config.secondary_success_probability,
            ),
            (
                RecoveryStage::Fallback,
                path.fallback.as_ref(),
                self.config.fallback_success_probability,
            ),
        ];

        let mut attempts = Vec::new();
        for (stage, strategy, probability) in stages {
            let Some(strategy) = strategy else {
                continue;
            };
            tokio::time::sleep(Duration::from_millis(self.config.stage_delay_ms)).await;
            let succeeded = self.random.chance(probability);
            attempts.push(StageAttempt {
                stage,
                strategy: strategy.clone(),
                succeeded,
                recovery_time_ms: start.elapsed().as_millis() as u64,
            });
            if succeeded {
                break;
            }
        }

        // The primary stage is always declared, so there is at least one attempt
        let (attempted_stage, succeeded, actual_recovery_time_ms) = attempts
            .last()
            .map(|a| (a.stage, a.succeeded, a.recovery_time_ms))
            .unwrap_or((RecoveryStage::Primary, false, start.elapsed().as_millis() as u64));

        let ux_severity = if succeeded {
            attempted_stage.success_severity()
        } else {
            UxSeverity::Critical
        };
        let description = if succeeded {
            format!(
                "{} recovered via {} strategy",
                path.component, attempted_stage
            )
        } else {
            format!("{} failed to recover: every declared stage failed", path.component)
        };
        self.tracker
            .record_impact(UxImpactRecord::new(
                path.component.clone(),
                ux_severity,
                description,
                actual_recovery_time_ms,
            ))
            .await;

        info!(
            component = %path.component,
            stage = %attempted_stage,
            succeeded,
            recovery_time_ms = actual_recovery_time_ms,
            "Recovery path validated"
        );

        PathOutcome {
            component: path.component.clone(),
            attempted_stage,
            succeeded,
            actual_recovery_time_ms,
            expected_recovery_time_ms: path.expected_recovery_time_ms,
            within_expected: succeeded && actual_recovery_time_ms <= path.expected_recovery_time_ms,
            attempts,
            injection_id,
            ux_severity,
        }
    }

    /// Validate every path in order, aggregate, and persist the report when
    /// a store is attached.
    pub async fn validate_all(&self, paths: &[RecoveryPath]) -> AppResult<RecoveryVerificationReport> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            outcomes.push(self.validate_path(path).await);
        }

        let summary = RecoverySummary::from_outcomes(&outcomes);
        let mut report = RecoveryVerificationReport {
            generated_at: Utc::now(),
            summary,
            paths: outcomes,
            report_id: None,
        };

        if let Some(store) = &self.store {
            let stored = StoredReport::new(ReportKind::RecoveryVerification, &report)?;
            store.save_report(&stored).await?;
            report.report_id = Some(stored.id);
        }

        info!(
            total = report.summary.total,
            success_rate = report.summary.success_rate,
            complete_failure = report.summary.complete_failure,
            "Recovery verification completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChaosConfig;
    use crate::random::SequenceRandom;

    fn validator(draws: Vec<f64>) -> (RecoveryPathValidator, Arc<UxImpactTracker>) {
        let harness = Arc::new(ChaosHarness::new(ChaosConfig {
            max_concurrent_failures: 10,
            ..ChaosConfig::default()
        }));
        let tracker = Arc::new(UxImpactTracker::new());
        let validator = RecoveryPathValidator::new(
            RecoveryConfig::default(),
            harness,
            Arc::clone(&tracker),
            Arc::new(SequenceRandom::new(draws)),
        );
        (validator, tracker)
    }

    fn full_path(component: &str) -> RecoveryPath {
        RecoveryPath {
            component: component.to_string(),
            primary: "retry".to_string(),
            secondary: Some("failover".to_string()),
            fallback: Some("cache".to_string()),
            expected_recovery_time_ms: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success_is_moderate() {
        let (validator, tracker) = validator(vec![0.1]);
        let outcome = validator.validate_path(&full_path("database")).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.recovered_by(), Some(RecoveryStage::Primary));
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.actual_recovery_time_ms, 150);
        assert!(outcome.within_expected);

        let impacts = tracker.impacts().await;
        assert_eq!(impacts[0].severity, UxSeverity::Moderate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_to_fallback_is_severe() {
        // primary fails (0.8 >= 0.7), secondary fails (0.7 >= 0.6), fallback succeeds
        let (validator, tracker) = validator(vec![0.8, 0.7, 0.5]);
        let outcome = validator.validate_path(&full_path("api")).await;

        assert_eq!(outcome.recovered_by(), Some(RecoveryStage::Fallback));
        let times: Vec<u64> = outcome.attempts.iter().map(|a| a.recovery_time_ms).collect();
        assert_eq!(times, vec![150, 200, 250]);
        assert_eq!(tracker.impacts().await[0].severity, UxSeverity::Severe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_only_path_fails_completely() {
        let (validator, tracker) = validator(vec![0.95]);
        let path = RecoveryPath {
            secondary: None,
            fallback: None,
            ..full_path("search")
        };
        let outcome = validator.validate_path(&path).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.recovered_by(), None);
        assert_eq!(outcome.ux_severity, UxSeverity::Critical);
        assert!(!outcome.within_expected);
        assert_eq!(tracker.impacts().await[0].severity, UxSeverity::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_counts_add_up() {
        // database: primary; api: secondary; auth (no secondary): fallback fails; search: primary
        let (validator, _) = validator(vec![0.1, 0.9, 0.1, 0.9, 0.95, 0.2]);
        let report = validator
            .validate_all(&RecoveryPath::defaults())
            .await
            .unwrap();

        let s = &report.summary;
        assert_eq!(s.total, 4);
        assert_eq!(s.primary_success, 2);
        assert_eq!(s.secondary_success, 1);
        assert_eq!(s.fallback_success, 0);
        assert_eq!(s.complete_failure, 1);
        assert_eq!(
            s.primary_success + s.secondary_success + s.fallback_success + s.complete_failure,
            s.total
        );
        assert_eq!(s.success_rate, 0.75);
        assert!(report.report_id.is_none());
    }
}
