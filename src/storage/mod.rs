//! Storage layer for report persistence.
//!
//! Every report the harness produces is plain JSON. Reports are stored as a
//! [`StoredReport`] envelope tagged with a [`ReportKind`], so one table holds
//! UX impact reports, telemetry reports, timelines, anomaly lists, recovery
//! verification summaries and load scenario reports.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Kind of a persisted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// UX impact report
    UxImpact,
    /// Telemetry report
    Telemetry,
    /// Chaos timeline visualization
    Timeline,
    /// Anomaly list
    Anomalies,
    /// Recovery path verification summary
    RecoveryVerification,
    /// Load scenario report
    LoadScenario,
}

impl ReportKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::UxImpact => "ux_impact",
            ReportKind::Telemetry => "telemetry",
            ReportKind::Timeline => "timeline",
            ReportKind::Anomalies => "anomalies",
            ReportKind::RecoveryVerification => "recovery_verification",
            ReportKind::LoadScenario => "load_scenario",
        }
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ux_impact" => Ok(ReportKind::UxImpact),
            "telemetry" => Ok(ReportKind::Telemetry),
            "timeline" => Ok(ReportKind::Timeline),
            "anomalies" => Ok(ReportKind::Anomalies),
            "recovery_verification" => Ok(ReportKind::RecoveryVerification),
            "load_scenario" => Ok(ReportKind::LoadScenario),
            _ => Err(format!("Unknown report kind: {}", s)),
        }
    }
}

/// A persisted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    /// Unique report identifier.
    pub id: String,
    /// Report kind.
    pub kind: ReportKind,
    /// When the report was stored.
    pub created_at: DateTime<Utc>,
    /// Report document.
    pub body: serde_json::Value,
}

impl StoredReport {
    /// Wrap a serialisable report.
    pub fn new<T: Serialize>(kind: ReportKind, report: &T) -> StorageResult<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kind,
            created_at: Utc::now(),
            body: serde_json::to_value(report)?,
        })
    }
}

/// Report persistence.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report.
    async fn save_report(&self, report: &StoredReport) -> StorageResult<()>;

    /// Load a report by ID.
    async fn get_report(&self, id: &str) -> StorageResult<Option<StoredReport>>;

    /// Most recent reports first, optionally restricted to one kind.
    async fn list_reports(
        &self,
        kind: Option<ReportKind>,
        limit: u32,
    ) -> StorageResult<Vec<StoredReport>>;

    /// Number of stored reports, optionally restricted to one kind.
    async fn count_reports(&self, kind: Option<ReportKind>) -> StorageResult<u64>;

    /// Delete a report.
    async fn delete_report(&self, id: &str) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_kind_round_trip() {
        for kind in [
            ReportKind::UxImpact,
            ReportKind::Telemetry,
            ReportKind::Timeline,
            ReportKind::Anomalies,
            ReportKind::RecoveryVerification,
            ReportKind::LoadScenario,
        ] {
            assert_eq!(kind.as_str().parse::<ReportKind>().unwrap(), kind);
        }
        assert!("weather".parse::<ReportKind>().is_err());
    }

    #[test]
    fn test_stored_report_wraps_body() {
        let report = StoredReport::new(ReportKind::Anomalies, &vec![1, 2, 3]).unwrap();
        assert_eq!(report.kind, ReportKind::Anomalies);
        assert_eq!(report.body, serde_json::json!([1, 2, 3]));
        assert!(!report.id.is_empty());
    }
}
