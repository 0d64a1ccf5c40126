//! Backup task repository
//!
//! Database operations for backup tasks, including the atomic
//! `ready -> running` transition that keeps one run per remote server.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{BackupTask, NewBackupTask, TaskKind, TaskStatus};

use super::{parse_datetime, parse_optional_datetime};

/// Repository for backup task operations
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new task and return it
    pub async fn create(&self, task: &NewBackupTask) -> Result<BackupTask> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO backup_tasks (
                user_id, remote_server_id, backup_destination_id, label, description,
                kind, source_path, database_name, excluded_database_tables,
                retention_count, appended_file_name, store_path,
                isolated_username, isolated_password, status, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'ready', ?15, ?15
            )
            "#,
        )
        .bind(task.user_id)
        .bind(task.remote_server_id)
        .bind(task.backup_destination_id)
        .bind(&task.label)
        .bind(&task.description)
        .bind(task.kind.to_string())
        .bind(&task.source_path)
        .bind(&task.database_name)
        .bind(&task.excluded_database_tables)
        .bind(task.retention_count)
        .bind(&task.appended_file_name)
        .bind(&task.store_path)
        .bind(&task.isolated_username)
        .bind(&task.isolated_password)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to create backup task")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("Backup task vanished after insert")
    }

    /// Get a task by ID
    pub async fn get(&self, id: i64) -> Result<Option<BackupTask>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM backup_tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch backup task")?;

        Ok(row.map(|r| r.into()))
    }

    /// List tasks currently running against a server
    pub async fn running_on_server(&self, remote_server_id: i64) -> Result<Vec<BackupTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM backup_tasks
            WHERE remote_server_id = ?1 AND status = 'running'
            ORDER BY id
            "#,
        )
        .bind(remote_server_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list running tasks")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Atomically move a task from `ready` to `running`
    ///
    /// The transition only happens when the task is not paused, is not
    /// already running, and no other task on the same remote server is
    /// running. Returns whether this caller won the claim.
    pub async fn try_claim(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE backup_tasks
            SET status = 'running', updated_at = ?1
            WHERE id = ?2
              AND status = 'ready'
              AND paused_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM backup_tasks AS other
                  WHERE other.remote_server_id = backup_tasks.remote_server_id
                    AND other.status = 'running'
              )
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to claim backup task")?;

        Ok(result.rows_affected() == 1)
    }

    /// Return a task to `ready`; a successful run also stamps `last_run_at`
    pub async fn release(&self, id: i64, successful: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let query = if successful {
            r#"
            UPDATE backup_tasks
            SET status = 'ready', last_run_at = ?1, updated_at = ?1
            WHERE id = ?2
            "#
        } else {
            r#"
            UPDATE backup_tasks
            SET status = 'ready', updated_at = ?1
            WHERE id = ?2
            "#
        };

        sqlx::query(query)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to release backup task")?;

        Ok(())
    }

    /// Pause or resume a task
    pub async fn set_paused(&self, id: i64, paused: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE backup_tasks
            SET paused_at = ?1, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(if paused { Some(now.clone()) } else { None })
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update paused state")?;

        Ok(())
    }

    /// Reset tasks left `running` by a crashed process
    pub async fn reset_stale_running(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE backup_tasks
            SET status = 'ready', updated_at = ?1
            WHERE status = 'running'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to reset running tasks")?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: i64,
    user_id: i64,
    remote_server_id: i64,
    backup_destination_id: i64,
    label: String,
    description: Option<String>,
    kind: String,
    source_path: Option<String>,
    database_name: Option<String>,
    excluded_database_tables: Option<String>,
    retention_count: i64,
    appended_file_name: Option<String>,
    store_path: Option<String>,
    isolated_username: Option<String>,
    isolated_password: Option<String>,
    status: String,
    paused_at: Option<String>,
    last_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<TaskRow> for BackupTask {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            remote_server_id: row.remote_server_id,
            backup_destination_id: row.backup_destination_id,
            label: row.label,
            description: row.description,
            kind: TaskKind::from(row.kind),
            source_path: row.source_path,
            database_name: row.database_name,
            excluded_database_tables: row.excluded_database_tables,
            retention_count: row.retention_count,
            appended_file_name: row.appended_file_name,
            store_path: row.store_path,
            isolated_username: row.isolated_username,
            isolated_password: row.isolated_password,
            status: TaskStatus::from(row.status),
            paused_at: parse_optional_datetime(row.paused_at),
            last_run_at: parse_optional_datetime(row.last_run_at),
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}
