//! Run log repository
//!
//! Logs are append-only while a run is in progress; `successful_at` is set
//! once, on full success.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{BackupTaskData, BackupTaskLog};

use super::{parse_datetime, parse_optional_datetime};

/// Repository for run logs and run statistics
pub struct TaskLogRepository {
    pool: SqlitePool,
}

impl TaskLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an empty log row for a new run
    pub async fn create(&self, backup_task_id: i64) -> Result<BackupTaskLog> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO backup_task_logs (backup_task_id, output, created_at)
            VALUES (?1, '', ?2)
            "#,
        )
        .bind(backup_task_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to create task log")?;

        Ok(BackupTaskLog {
            id: result.last_insert_rowid(),
            backup_task_id,
            output: String::new(),
            successful_at: None,
            finished_at: None,
            created_at: now,
        })
    }

    /// Append text to a log's output
    pub async fn append(&self, id: i64, text: &str) -> Result<()> {
        sqlx::query("UPDATE backup_task_logs SET output = output || ?1 WHERE id = ?2")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to append to task log")?;

        Ok(())
    }

    /// Mark a run as fully successful and finished
    pub async fn mark_successful(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE backup_task_logs
            SET successful_at = ?1, finished_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark task log successful")?;

        Ok(())
    }

    /// Mark a run as finished without success
    pub async fn mark_finished(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE backup_task_logs SET finished_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark task log finished")?;

        Ok(())
    }

    /// Get a log by ID
    pub async fn get(&self, id: i64) -> Result<Option<BackupTaskLog>> {
        let row = sqlx::query_as::<_, LogRow>("SELECT * FROM backup_task_logs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task log")?;

        Ok(row.map(|r| r.into()))
    }

    /// Most recent log of a task
    pub async fn latest_for_task(&self, backup_task_id: i64) -> Result<Option<BackupTaskLog>> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT * FROM backup_task_logs
            WHERE backup_task_id = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(backup_task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest task log")?;

        Ok(row.map(|r| r.into()))
    }

    /// List logs of a task, newest first
    pub async fn list_for_task(
        &self,
        backup_task_id: i64,
        limit: u32,
    ) -> Result<Vec<BackupTaskLog>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT * FROM backup_task_logs
            WHERE backup_task_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(backup_task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list task logs")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Number of log rows for a task
    pub async fn count_for_task(&self, backup_task_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM backup_task_logs WHERE backup_task_id = ?1")
                .bind(backup_task_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count task logs")?;

        Ok(count)
    }

    /// Record duration and artifact size of a successful run
    pub async fn record_run_data(
        &self,
        backup_task_id: i64,
        duration_seconds: i64,
        size_bytes: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_task_data (backup_task_id, duration_seconds, size_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(backup_task_id)
        .bind(duration_seconds)
        .bind(size_bytes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record run data")?;

        Ok(())
    }

    /// Run statistics of a task, newest first
    pub async fn list_run_data(&self, backup_task_id: i64) -> Result<Vec<BackupTaskData>> {
        let rows = sqlx::query_as::<_, DataRow>(
            r#"
            SELECT * FROM backup_task_data
            WHERE backup_task_id = ?1
            ORDER BY id DESC
            "#,
        )
        .bind(backup_task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list run data")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: i64,
    backup_task_id: i64,
    output: String,
    successful_at: Option<String>,
    finished_at: Option<String>,
    created_at: String,
}

impl From<LogRow> for BackupTaskLog {
    fn from(row: LogRow) -> Self {
        Self {
            id: row.id,
            backup_task_id: row.backup_task_id,
            output: row.output,
            successful_at: parse_optional_datetime(row.successful_at),
            finished_at: parse_optional_datetime(row.finished_at),
            created_at: parse_datetime(&row.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DataRow {
    id: i64,
    backup_task_id: i64,
    duration_seconds: i64,
    size_bytes: Option<i64>,
    created_at: String,
}

impl From<DataRow> for BackupTaskData {
    fn from(row: DataRow) -> Self {
        Self {
            id: row.id,
            backup_task_id: row.backup_task_id,
            duration_seconds: row.duration_seconds,
            size_bytes: row.size_bytes,
            created_at: parse_datetime(&row.created_at),
        }
    }
}
