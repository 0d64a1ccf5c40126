//! Backup task log models
//!
//! One log row is written per run. Its `successful_at` stays null unless
//! every stage of the run succeeded; that is how failed runs are told
//! apart from successful ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run log record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTaskLog {
    pub id: i64,
    pub backup_task_id: i64,
    pub output: String,
    pub successful_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BackupTaskLog {
    pub fn is_successful(&self) -> bool {
        self.successful_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Statistics captured for a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTaskData {
    pub id: i64,
    pub backup_task_id: i64,
    pub duration_seconds: i64,
    pub size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// API response for a run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogResponse {
    pub id: i64,
    pub backup_task_id: i64,
    pub output: String,
    pub successful: bool,
    pub successful_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<BackupTaskLog> for TaskLogResponse {
    fn from(log: BackupTaskLog) -> Self {
        Self {
            id: log.id,
            backup_task_id: log.backup_task_id,
            successful: log.is_successful(),
            output: log.output,
            successful_at: log.successful_at,
            finished_at: log.finished_at,
            created_at: log.created_at,
        }
    }
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
