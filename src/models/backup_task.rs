//! Backup task models
//!
//! A backup task is a scheduled unit of work: which remote server to read
//! from, what to back up, and where the artifact is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default prefix for every artifact file name
pub const ARTIFACT_PREFIX: &str = "backup_";

/// Timestamp format embedded in artifact file names
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

// =============================================================================
// Enums
// =============================================================================

/// What a task backs up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Files,
    Database,
}

impl TaskKind {
    /// File extension of the artifact produced for this kind
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            TaskKind::Files => ".zip",
            TaskKind::Database => ".sql",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Files => write!(f, "files"),
            TaskKind::Database => write!(f, "database"),
        }
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "database" => TaskKind::Database,
            _ => TaskKind::Files,
        }
    }
}

/// Run state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ready,
    Running,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "running" => TaskStatus::Running,
            _ => TaskStatus::Ready,
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Backup task record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: i64,
    pub user_id: i64,
    pub remote_server_id: i64,
    pub backup_destination_id: i64,
    pub label: String,
    pub description: Option<String>,
    pub kind: TaskKind,
    /// Directory to archive (files tasks)
    pub source_path: Option<String>,
    /// Database to dump (database tasks)
    pub database_name: Option<String>,
    /// Comma-separated table names left out of the dump
    pub excluded_database_tables: Option<String>,
    /// Keep at most this many artifacts; 0 keeps everything
    pub retention_count: i64,
    /// Optional suffix appended to artifact file names
    pub appended_file_name: Option<String>,
    /// Optional sub-path inside the destination
    pub store_path: Option<String>,
    pub isolated_username: Option<String>,
    /// Encrypted password for the isolated login
    #[serde(skip_serializing)]
    pub isolated_password: Option<String>,
    pub status: TaskStatus,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupTask {
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn has_unlimited_retention(&self) -> bool {
        self.retention_count <= 0
    }

    /// Whether the task overrides the server's SSH login
    pub fn has_isolated_credentials(&self) -> bool {
        self.isolated_username.is_some() && self.isolated_password.is_some()
    }

    /// Artifact file name for a run started at `at`
    ///
    /// `{prefix}{task_id}_{timestamp}[_{suffix}]{extension}`; rotation relies
    /// on this shape staying stable.
    pub fn artifact_file_name(&self, at: DateTime<Utc>) -> String {
        let timestamp = at.format(ARTIFACT_TIMESTAMP_FORMAT);
        let suffix = self
            .appended_file_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| format!("_{}", s))
            .unwrap_or_default();

        format!(
            "{}{}_{}{}{}",
            ARTIFACT_PREFIX,
            self.id,
            timestamp,
            suffix,
            self.kind.artifact_extension()
        )
    }
}

/// New task to insert
#[derive(Debug, Clone, Deserialize)]
pub struct NewBackupTask {
    pub user_id: i64,
    pub remote_server_id: i64,
    pub backup_destination_id: i64,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: TaskKind,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub excluded_database_tables: Option<String>,
    #[serde(default)]
    pub retention_count: i64,
    #[serde(default)]
    pub appended_file_name: Option<String>,
    #[serde(default)]
    pub store_path: Option<String>,
    #[serde(default)]
    pub isolated_username: Option<String>,
    /// Already encrypted
    #[serde(default)]
    pub isolated_password: Option<String>,
}

// =============================================================================
// API Response Types
// =============================================================================

/// Status response for a single task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub id: i64,
    pub status: TaskStatus,
}

impl From<&BackupTask> for TaskStatusResponse {
    fn from(task: &BackupTask) -> Self {
        Self {
            id: task.id,
            status: task.status,
        }
    }
}
