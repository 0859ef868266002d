//! Integration tests for SQLite report storage
//!
//! Tests database operations using in-memory and temporary file databases.

use serde_json::json;
use tempfile::tempdir;

use chaos_harness::config::DatabaseConfig;
use chaos_harness::error::StorageError;
use chaos_harness::storage::{ReportKind, ReportStore, SqliteStorage, StoredReport};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn report(kind: ReportKind, value: serde_json::Value) -> StoredReport {
    StoredReport::new(kind, &value).expect("report should serialize")
}

#[cfg(test)]
mod report_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_get_report() {
        let storage = create_test_storage().await;
        let saved = report(ReportKind::UxImpact, json!({"summary": {"score": 87.5}}));

        storage.save_report(&saved).await.unwrap();

        let loaded = storage.get_report(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, saved.id);
        assert_eq!(loaded.kind, ReportKind::UxImpact);
        assert_eq!(loaded.body["summary"]["score"], 87.5);
    }

    #[tokio::test]
    async fn test_get_nonexistent_report() {
        let storage = create_test_storage().await;

        let result = storage.get_report("nonexistent-id").await.unwrap();

        assert!(result.is_none(), "Should return None for nonexistent report");
    }

    #[tokio::test]
    async fn test_list_reports_newest_first_and_filtered() {
        let storage = create_test_storage().await;
        let first = report(ReportKind::Telemetry, json!({"n": 1}));
        let second = report(ReportKind::Anomalies, json!([]));
        let third = report(ReportKind::Telemetry, json!({"n": 3}));
        for r in [&first, &second, &third] {
            storage.save_report(r).await.unwrap();
        }

        let all = storage.list_reports(None, 10).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

        let telemetry = storage
            .list_reports(Some(ReportKind::Telemetry), 10)
            .await
            .unwrap();
        assert_eq!(telemetry.len(), 2);
        assert!(telemetry.iter().all(|r| r.kind == ReportKind::Telemetry));

        let limited = storage.list_reports(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, third.id);
    }

    #[tokio::test]
    async fn test_count_reports() {
        let storage = create_test_storage().await;
        assert_eq!(storage.count_reports(None).await.unwrap(), 0);

        storage
            .save_report(&report(ReportKind::Timeline, json!({"points": []})))
            .await
            .unwrap();
        storage
            .save_report(&report(ReportKind::LoadScenario, json!({"constraints": []})))
            .await
            .unwrap();

        assert_eq!(storage.count_reports(None).await.unwrap(), 2);
        assert_eq!(
            storage
                .count_reports(Some(ReportKind::Timeline))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .count_reports(Some(ReportKind::RecoveryVerification))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_delete_report() {
        let storage = create_test_storage().await;
        let saved = report(ReportKind::RecoveryVerification, json!({"paths": []}));
        storage.save_report(&saved).await.unwrap();

        storage.delete_report(&saved.id).await.unwrap();
        assert!(storage.get_report(&saved.id).await.unwrap().is_none());

        let err = storage.delete_report(&saved.id).await.unwrap_err();
        assert!(matches!(err, StorageError::ReportNotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_timestamp_is_an_error() {
        let storage = create_test_storage().await;
        sqlx::query("INSERT INTO reports (id, kind, created_at, body) VALUES (?, ?, ?, ?)")
            .bind("corrupt-row")
            .bind("telemetry")
            .bind("yesterday")
            .bind("{}")
            .execute(storage.pool())
            .await
            .unwrap();

        let err = storage.get_report("corrupt-row").await.unwrap_err();
        assert!(matches!(err, StorageError::Query { .. }));
        assert!(err.to_string().contains("created_at"));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let storage = create_test_storage().await;
        let saved = report(ReportKind::UxImpact, json!({}));
        storage.save_report(&saved).await.unwrap();

        let result = storage.save_report(&saved).await;
        assert!(result.is_err(), "Primary key should reject duplicate IDs");
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("reports.db"),
            max_connections: 2,
        };

        let saved = report(ReportKind::Anomalies, json!([{"metric": "error_rate"}]));
        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.save_report(&saved).await.unwrap();
            storage.pool().close().await;
        }

        let storage = SqliteStorage::new(&config).await.unwrap();
        let loaded = storage.get_report(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.body[0]["metric"], "error_rate");
    }
}
