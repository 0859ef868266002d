//! UX impact tracking.
//!
//! Records user-visible degradation observed during a test run and scores
//! it.
//!
//! # Scoring
//!
//! Each record contributes an impact in `[0, 1]`:
//!
//! ```text
//! impact = 0.7 × (severity_weight / 5) + 0.3 × min(recovery_time_ms / 30_000, 1)
//! ```
//!
//! with weights NONE = 0 through CRITICAL = 5. The run score is
//! `100 × (1 − mean impact)`, so it never increases when a record's severity
//! or recovery time increases. An empty run scores 100.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

const SEVERITY_WEIGHT_SHARE: f64 = 0.7;
const RECOVERY_TIME_SHARE: f64 = 0.3;
/// Recovery time at which the time component saturates.
const RECOVERY_TIME_CEILING_MS: f64 = 30_000.0;
const SLOW_RECOVERY_MS: f64 = 5_000.0;
const LOW_SCORE: f64 = 50.0;

/// Ordered user-visible degradation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UxSeverity {
    /// No visible effect
    None,
    /// Cosmetic glitch
    Minor,
    /// Degraded, primary recovery restored service
    Moderate,
    /// Noticeably degraded, secondary recovery needed
    Significant,
    /// Severely degraded, only the fallback restored service
    Severe,
    /// Service lost, every recovery stage failed
    Critical,
}

impl UxSeverity {
    /// All levels, lowest first.
    pub const ALL: [UxSeverity; 6] = [
        UxSeverity::None,
        UxSeverity::Minor,
        UxSeverity::Moderate,
        UxSeverity::Significant,
        UxSeverity::Severe,
        UxSeverity::Critical,
    ];

    /// Scoring weight, 0 (NONE) to 5 (CRITICAL).
    pub fn weight(&self) -> u8 {
        *self as u8
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            UxSeverity::None => "NONE",
            UxSeverity::Minor => "MINOR",
            UxSeverity::Moderate => "MODERATE",
            UxSeverity::Significant => "SIGNIFICANT",
            UxSeverity::Severe => "SEVERE",
            UxSeverity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for UxSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UxSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(UxSeverity::None),
            "MINOR" => Ok(UxSeverity::Minor),
            "MODERATE" => Ok(UxSeverity::Moderate),
            "SIGNIFICANT" => Ok(UxSeverity::Significant),
            "SEVERE" => Ok(UxSeverity::Severe),
            "CRITICAL" => Ok(UxSeverity::Critical),
            _ => Err(format!("Unknown UX severity: {}", s)),
        }
    }
}

/// One observed degradation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UxImpactRecord {
    /// Affected component
    pub component: String,
    /// Degradation level
    pub severity: UxSeverity,
    /// What the user experienced
    pub description: String,
    /// Time until service was restored (milliseconds)
    pub recovery_time_ms: u64,
    /// When the impact was recorded
    pub timestamp: DateTime<Utc>,
}

impl UxImpactRecord {
    /// Create a record stamped now.
    pub fn new(
        component: impl Into<String>,
        severity: UxSeverity,
        description: impl Into<String>,
        recovery_time_ms: u64,
    ) -> Self {
        Self {
            component: component.into(),
            severity,
            description: description.into(),
            recovery_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// This record's impact in `[0, 1]`.
    pub fn impact(&self) -> f64 {
        let severity = f64::from(self.severity.weight()) / 5.0;
        let recovery = (self.recovery_time_ms as f64 / RECOVERY_TIME_CEILING_MS).min(1.0);
        SEVERITY_WEIGHT_SHARE * severity + RECOVERY_TIME_SHARE * recovery
    }
}

/// Aggregate over a set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    /// Number of records
    pub count: usize,
    /// Records per severity, every level present
    pub distribution: BTreeMap<UxSeverity, usize>,
    /// Mean recovery time (milliseconds)
    pub average_recovery_time_ms: f64,
    /// Longest recovery time (milliseconds)
    pub max_recovery_time_ms: u64,
    /// Worst severity recorded
    pub worst_severity: Option<UxSeverity>,
    /// Normalised score, 100 = no impact
    pub score: f64,
}

impl ImpactSummary {
    /// Summarise a set of records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UxImpactRecord>) -> Self {
        let mut distribution: BTreeMap<UxSeverity, usize> =
            UxSeverity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut count = 0usize;
        let mut total_recovery = 0u64;
        let mut max_recovery = 0u64;
        let mut total_impact = 0.0;
        let mut worst: Option<UxSeverity> = None;

        for record in records {
            count += 1;
            *distribution.entry(record.severity).or_insert(0) += 1;
            total_recovery += record.recovery_time_ms;
            max_recovery = max_recovery.max(record.recovery_time_ms);
            total_impact += record.impact();
            worst = worst.max(Some(record.severity));
        }

        let (average_recovery_time_ms, score) = if count == 0 {
            (0.0, 100.0)
        } else {
            (
                total_recovery as f64 / count as f64,
                100.0 * (1.0 - total_impact / count as f64),
            )
        };

        Self {
            count,
            distribution,
            average_recovery_time_ms,
            max_recovery_time_ms: max_recovery,
            worst_severity: worst,
            score,
        }
    }
}

/// Per-component breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentImpact {
    /// Component name
    pub component: String,
    /// Aggregate for this component
    pub summary: ImpactSummary,
}

/// Full UX impact report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UxImpactReport {
    /// When the report was built
    pub generated_at: DateTime<Utc>,
    /// Aggregate over all records
    pub summary: ImpactSummary,
    /// Aggregates per component, by name
    pub components: Vec<ComponentImpact>,
    /// Suggested follow-ups
    pub recommendations: Vec<String>,
    /// Every record, in recording order
    pub records: Vec<UxImpactRecord>,
}

/// Accumulates impact records for one test run.
#[derive(Debug, Default)]
pub struct UxImpactTracker {
    records: RwLock<Vec<UxImpactRecord>>,
}

impl UxImpactTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub async fn record_impact(&self, record: UxImpactRecord) {
        debug!(
            component = %record.component,
            severity = %record.severity,
            recovery_time_ms = record.recovery_time_ms,
            "UX impact recorded"
        );
        self.records.write().await.push(record);
    }

    /// Every record, in recording order.
    pub async fn impacts(&self) -> Vec<UxImpactRecord> {
        self.records.read().await.clone()
    }

    /// Aggregate over all records.
    pub async fn calculate_impact(&self) -> ImpactSummary {
        ImpactSummary::from_records(self.records.read().await.iter())
    }

    /// Aggregate, per-component breakdown and recommendations.
    pub async fn generate_ux_impact_report(&self) -> UxImpactReport {
        let records = self.records.read().await.clone();
        let summary = ImpactSummary::from_records(records.iter());

        let mut by_component: BTreeMap<&str, Vec<&UxImpactRecord>> = BTreeMap::new();
        for record in &records {
            by_component
                .entry(record.component.as_str())
                .or_default()
                .push(record);
        }
        let components: Vec<ComponentImpact> = by_component
            .into_iter()
            .map(|(component, records)| ComponentImpact {
                component: component.to_string(),
                summary: ImpactSummary::from_records(records),
            })
            .collect();

        let recommendations = recommendations(&summary, &components);
        info!(
            records = summary.count,
            score = summary.score,
            "UX impact report generated"
        );

        UxImpactReport {
            generated_at: Utc::now(),
            summary,
            components,
            recommendations,
            records,
        }
    }

    /// Drop every record. Use between isolated test cases.
    pub async fn clear_impacts(&self) {
        let mut records = self.records.write().await;
        debug!(cleared = records.len(), "UX impacts cleared");
        records.clear();
    }
}

fn recommendations(summary: &ImpactSummary, components: &[ComponentImpact]) -> Vec<String> {
    if summary.count == 0 {
        return vec!["No user-visible impact recorded".to_string()];
    }

    let mut out = Vec::new();
    for component in components {
        let name = &component.component;
        match component.summary.worst_severity {
            Some(UxSeverity::Critical) => out.push(format!(
                "{}: every recovery stage failed; declare a fallback that restores service",
                name
            )),
            Some(UxSeverity::Severe) => out.push(format!(
                "{}: only the fallback restored service; harden primary and secondary recovery",
                name
            )),
            _ => {}
        }
        if component.summary.average_recovery_time_ms > SLOW_RECOVERY_MS {
            out.push(format!(
                "{}: average recovery {:.0} ms exceeds {:.0} ms; shorten detection and failover",
                name, component.summary.average_recovery_time_ms, SLOW_RECOVERY_MS
            ));
        }
    }
    if summary.score < LOW_SCORE {
        out.push(format!(
            "Overall UX score {:.1} is below {:.0}; prioritise resilience work",
            summary.score, LOW_SCORE
        ));
    }
    out
}
