//! End-to-end orchestration.
//!
//! [`ChaosTestbed`] builds every component from one [`Config`], wires the
//! dispatcher to the failure injection engine and the telemetry collector
//! to both, and drives a complete verification run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::chaos::{
    ChaosHarness, CpuConstraint, DiskConstraint, FailureOptions, FailureType, InjectionOutcome,
    LoadPattern, LoadScenarioConfig, LoadScenarioGenerator, LoadScenarioReport, MemoryConstraint,
    NetworkConstraint,
};
use crate::config::Config;
use crate::dispatcher::{CircuitState, DispatchResult, FaultSource, IntentDispatcher};
use crate::error::AppResult;
use crate::random::{RandomSource, SeededRandom, ThreadRandom};
use crate::recovery::{RecoveryPath, RecoveryPathValidator, RecoveryVerificationReport};
use crate::storage::{ReportKind, ReportStore, StoredReport};
use crate::telemetry::{
    Anomaly, DispatcherMetricSource, HarnessMetricSource, TelemetryCollector, TelemetryReport,
    TimelineVisualization,
};
use crate::ux_impact::{UxImpactRecord, UxImpactReport, UxImpactTracker, UxSeverity};

/// Target of the database outage scenario.
pub const DATABASE_TARGET: &str = "database";

/// Poll period while waiting for an open breaker to cool down.
const COOLDOWN_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Run Options and Reports
// ============================================================================

/// What a verification run does.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Baseline collection window
    pub baseline_duration: Duration,
    /// Chaos monitoring sampling period
    pub monitor_interval: Duration,
    /// Load applied alongside the database outage; `None` skips load
    pub load: Option<LoadScenarioConfig>,
    /// Recovery paths to validate
    pub recovery_paths: Vec<RecoveryPath>,
}

impl RunOptions {
    /// Defaults derived from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            baseline_duration: Duration::from_millis(500),
            monitor_interval: config.telemetry.sampling_interval(),
            load: Some(default_load_scenario()),
            recovery_paths: RecoveryPath::defaults(),
        }
    }
}

/// A moderate mixed load lasting one second.
pub fn default_load_scenario() -> LoadScenarioConfig {
    LoadScenarioConfig {
        cpu: Some(CpuConstraint {
            utilization: 0.5,
            duration_ms: 1_000,
            pattern: LoadPattern::Constant,
        }),
        memory: Some(MemoryConstraint {
            target_mb: 16,
            duration_ms: 1_000,
        }),
        network: Some(NetworkConstraint {
            latency_ms: 300,
            packet_loss: 0.02,
            bandwidth_kbps: 1_000,
            duration_ms: 1_000,
        }),
        disk: Some(DiskConstraint {
            latency_ms: 150,
            error_rate: 0.005,
            duration_ms: 1_000,
        }),
    }
}

/// Observations from the database outage scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseScenarioReport {
    /// Injected failure ID
    pub injection_id: Option<String>,
    /// Dispatches made while the outage was active
    pub failed_dispatches: Vec<DispatchResult>,
    /// Number of failed dispatches after which the breaker was OPEN
    pub breaker_opened_after: Option<usize>,
    /// Time from injection until `wait_for_recovery` returned (milliseconds)
    pub recovery_wait_ms: u64,
    /// Dispatch made once the breaker cooled down
    pub recovery_dispatch: DispatchResult,
    /// Breaker state after the recovery dispatch
    pub final_circuit_state: CircuitState,
}

/// Everything a verification run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub completed_at: DateTime<Utc>,
    /// Database outage scenario
    pub database_scenario: DatabaseScenarioReport,
    /// Load scenario, when one was requested
    pub load: Option<LoadScenarioReport>,
    /// Recovery verification
    pub recovery: RecoveryVerificationReport,
    /// Telemetry summary
    pub telemetry: TelemetryReport,
    /// Timeline over every metric
    pub timeline: TimelineVisualization,
    /// Anomalies raised while monitoring
    pub anomalies: Vec<Anomaly>,
    /// UX impact report
    pub ux_impact: UxImpactReport,
}

// ============================================================================
// ChaosTestbed
// ============================================================================

/// All harness components wired together.
pub struct ChaosTestbed {
    config: Config,
    dispatcher: Arc<IntentDispatcher>,
    harness: Arc<ChaosHarness>,
    load: LoadScenarioGenerator,
    telemetry: Arc<TelemetryCollector>,
    tracker: Arc<UxImpactTracker>,
    random: Arc<dyn RandomSource>,
    store: Option<Arc<dyn ReportStore>>,
}

impl ChaosTestbed {
    /// Build from configuration. The random source is seeded from
    /// `dispatcher.rng_seed` when set.
    pub fn new(config: Config) -> Self {
        let random: Arc<dyn RandomSource> = match config.dispatcher.rng_seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(ThreadRandom),
        };
        Self::with_random(config, random)
    }

    /// Build with an explicit random source shared by the dispatcher and the
    /// recovery validator.
    pub fn with_random(config: Config, random: Arc<dyn RandomSource>) -> Self {
        let dispatcher = IntentDispatcher::new(
            config.dispatcher.clone(),
            config.circuit_breaker.clone(),
        )
        .with_random(Arc::clone(&random));

        Self {
            dispatcher: Arc::new(dispatcher),
            harness: Arc::new(ChaosHarness::new(config.chaos.clone())),
            load: LoadScenarioGenerator::new(config.load.clone()),
            telemetry: Arc::new(TelemetryCollector::new(config.telemetry.clone())),
            tracker: Arc::new(UxImpactTracker::new()),
            random,
            store: None,
            config,
        }
    }

    /// Persist reports to `store`.
    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Initialize the dispatcher, start the harness and register the
    /// built-in metric sources.
    pub async fn start(&self) {
        self.dispatcher.initialize().await;
        self.dispatcher
            .attach_fault_source(Arc::clone(&self.harness) as Arc<dyn FaultSource>)
            .await;
        self.harness.start().await;

        self.telemetry
            .register_source(Arc::new(DispatcherMetricSource::new(Arc::clone(
                &self.dispatcher,
            ))))
            .await;
        self.telemetry
            .register_source(Arc::new(HarnessMetricSource::new(Arc::clone(&self.harness))))
            .await;
        info!("Chaos testbed started");
    }

    /// Return every component to its initial state, keeping the wiring.
    pub async fn reset(&self) {
        self.telemetry.reset().await;
        self.harness.cleanup().await;
        self.harness.start().await;
        self.dispatcher.reset().await;
        self.tracker.clear_impacts().await;
        info!("Chaos testbed reset");
    }

    /// Intent dispatcher.
    pub fn dispatcher(&self) -> &Arc<IntentDispatcher> {
        &self.dispatcher
    }

    /// Failure injection engine.
    pub fn harness(&self) -> &Arc<ChaosHarness> {
        &self.harness
    }

    /// Load scenario generator.
    pub fn load(&self) -> &LoadScenarioGenerator {
        &self.load
    }

    /// Telemetry collector.
    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    /// UX impact tracker.
    pub fn tracker(&self) -> &Arc<UxImpactTracker> {
        &self.tracker
    }

    /// Recovery validator sharing this testbed's harness, tracker, random
    /// source and store.
    pub fn recovery_validator(&self) -> RecoveryPathValidator {
        let validator = RecoveryPathValidator::new(
            self.config.recovery.clone(),
            Arc::clone(&self.harness),
            Arc::clone(&self.tracker),
            Arc::clone(&self.random),
        );
        match &self.store {
            Some(store) => validator.with_store(Arc::clone(store)),
            None => validator,
        }
    }

    /// Inject a failure and bracket it as a chaos event in the telemetry
    /// timeline until its duration elapses.
    pub async fn inject_tracked(&self, options: FailureOptions) -> InjectionOutcome {
        let outcome = self.harness.inject_failure(options).await;
        if let InjectionOutcome::Injected(injection) = &outcome {
            let event_id = self
                .telemetry
                .register_chaos_event(injection.failure_type.as_str(), &injection.target)
                .await;
            let telemetry = Arc::clone(&self.telemetry);
            let duration = Duration::from_millis(injection.duration_ms);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                telemetry.unregister_chaos_event(&event_id).await;
            });
        }
        outcome
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    /// Severity-4, five-second outage on `database`.
    ///
    /// Dispatches against `database` until its breaker opens (at most the
    /// breaker's failure threshold), waits for the outage to recover and the
    /// breaker to cool down, then dispatches once more.
    pub async fn run_database_outage_scenario(&self) -> AppResult<DatabaseScenarioReport> {
        let intent = self.dispatcher.process_text("search database records").await?;

        let options = FailureOptions::new(
            FailureType::ServiceOutage,
            DATABASE_TARGET,
            Duration::from_millis(5_000),
        )
        .with_severity(4);
        let injected_at = Instant::now();
        let injection_id = self
            .inject_tracked(options)
            .await
            .injection()
            .map(|injection| injection.id.clone());

        let mut failed_dispatches = Vec::new();
        let mut breaker_opened_after = None;
        for attempt in 1..=self.config.circuit_breaker.failure_threshold as usize {
            let result = self
                .dispatcher
                .dispatch_intent_to(&intent.id, DATABASE_TARGET)
                .await?;
            failed_dispatches.push(result);
            if self.dispatcher.circuit_state(DATABASE_TARGET).await == CircuitState::Open {
                breaker_opened_after = Some(attempt);
                break;
            }
        }

        self.harness.wait_for_recovery().await;
        let recovery_wait_ms = injected_at.elapsed().as_millis() as u64;

        let deadline = Instant::now() + self.config.circuit_breaker.cooldown() + COOLDOWN_POLL;
        while self.dispatcher.circuit_state(DATABASE_TARGET).await == CircuitState::Open {
            if Instant::now() >= deadline {
                warn!("Breaker still open after cool-down");
                break;
            }
            tokio::time::sleep(COOLDOWN_POLL).await;
        }

        let recovery_dispatch = self
            .dispatcher
            .dispatch_intent_to(&intent.id, DATABASE_TARGET)
            .await?;
        let final_circuit_state = self.dispatcher.circuit_state(DATABASE_TARGET).await;

        let severity = if recovery_dispatch.success {
            UxSeverity::Moderate
        } else {
            UxSeverity::Critical
        };
        self.tracker
            .record_impact(UxImpactRecord::new(
                DATABASE_TARGET,
                severity,
                "Database outage: dispatches failed fast until the breaker recovered",
                recovery_wait_ms,
            ))
            .await;

        info!(
            breaker_opened_after = ?breaker_opened_after,
            recovery_wait_ms,
            recovered = recovery_dispatch.success,
            "Database outage scenario completed"
        );

        Ok(DatabaseScenarioReport {
            injection_id,
            failed_dispatches,
            breaker_opened_after,
            recovery_wait_ms,
            recovery_dispatch,
            final_circuit_state,
        })
    }

    /// Complete verification run: baseline, monitoring, database outage with
    /// concurrent load, recovery path validation, reports.
    ///
    /// Every report is persisted when a store is attached.
    pub async fn run(&self, options: RunOptions) -> AppResult<RunReport> {
        let started_at = Utc::now();

        self.telemetry
            .collect_baseline_metrics(options.baseline_duration)
            .await?;
        self.telemetry
            .start_chaos_monitoring(options.monitor_interval)
            .await?;

        let load = async {
            match options.load.clone() {
                Some(scenario) => self.load.load_scenario(scenario).await.map(Some),
                None => Ok(None),
            }
        };
        let (database_scenario, load) = tokio::join!(self.run_database_outage_scenario(), load);
        let database_scenario = database_scenario?;
        let load = load?;

        let recovery = self
            .recovery_validator()
            .validate_all(&options.recovery_paths)
            .await?;

        self.telemetry.stop_chaos_monitoring().await;
        self.harness.wait_for_recovery().await;

        let report = RunReport {
            started_at,
            completed_at: Utc::now(),
            database_scenario,
            load,
            recovery,
            telemetry: self.telemetry.generate_telemetry_report().await,
            timeline: self.telemetry.generate_chaos_timeline_visualization(&[]).await,
            anomalies: self.telemetry.get_anomalies().await,
            ux_impact: self.tracker.generate_ux_impact_report().await,
        };

        self.persist_run(&report).await?;
        Ok(report)
    }

    /// The recovery validator persists its own report.
    async fn persist_run(&self, report: &RunReport) -> AppResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut stored = vec![
            StoredReport::new(ReportKind::UxImpact, &report.ux_impact)?,
            StoredReport::new(ReportKind::Telemetry, &report.telemetry)?,
            StoredReport::new(ReportKind::Timeline, &report.timeline)?,
            StoredReport::new(ReportKind::Anomalies, &report.anomalies)?,
        ];
        if let Some(load) = &report.load {
            stored.push(StoredReport::new(ReportKind::LoadScenario, load)?);
        }

        for entry in &stored {
            store.save_report(entry).await?;
        }
        info!(reports = stored.len() + 1, "Run reports persisted");
        Ok(())
    }
}
