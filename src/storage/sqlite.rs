use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ReportKind, ReportStore, StoredReport};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed report storage
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database (single connection).
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        // Every pooled connection to :memory: would be a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ReportStore for SqliteStorage {
    async fn save_report(&self, report: &StoredReport) -> StorageResult<()> {
        let body = serde_json::to_string(&report.body)?;

        sqlx::query(
            r#"
            INSERT INTO reports (id, kind, created_at, body)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(report.kind.as_str())
        .bind(report.created_at.to_rfc3339())
        .bind(&body)
        .execute(&self.pool)
        .await?;

        debug!(report_id = %report.id, kind = %report.kind, "Report saved");
        Ok(())
    }

    async fn get_report(&self, id: &str) -> StorageResult<Option<StoredReport>> {
        let row: Option<ReportRow> = sqlx::query_as(
            r#"
            SELECT id, kind, created_at, body
            FROM reports
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredReport::try_from).transpose()
    }

    async fn list_reports(
        &self,
        kind: Option<ReportKind>,
        limit: u32,
    ) -> StorageResult<Vec<StoredReport>> {
        let rows: Vec<ReportRow> = match kind {
            Some(kind) => {
                sqlx::query_as(
                    r#"
                    SELECT id, kind, created_at, body
                    FROM reports
                    WHERE kind = ?
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT ?
                    "#,
                )
                .bind(kind.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, kind, created_at, body
                    FROM reports
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT ?
                    "#,
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(StoredReport::try_from).collect()
    }

    async fn count_reports(&self, kind: Option<ReportKind>) -> StorageResult<u64> {
        let count: (i64,) = match kind {
            Some(kind) => {
                sqlx::query_as("SELECT COUNT(*) FROM reports WHERE kind = ?")
                    .bind(kind.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM reports")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count.0.max(0) as u64)
    }

    async fn delete_report(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ReportNotFound {
                report_id: id.to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: String,
    kind: String,
    created_at: String,
    body: String,
}

impl TryFrom<ReportRow> for StoredReport {
    type Error = StorageError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        use chrono::DateTime;

        let kind = ReportKind::from_str(&row.kind).map_err(|message| StorageError::Query {
            message,
        })?;

        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| StorageError::Query {
                message: format!(
                    "Report {} has invalid created_at {:?}: {}",
                    row.id, row.created_at, e
                ),
            })?;

        Ok(Self {
            id: row.id,
            kind,
            created_at,
            body: serde_json::from_str(&row.body)?,
        })
    }
}
