//! Retention rotation
//!
//! Keeps the newest N artifacts of earlier runs of a task at a destination.
//! The artifact of the current run is never counted, so a retention of N
//! leaves N previous copies plus the new one. Deletion is best effort: a
//! failed delete is logged and the loop moves on.

use regex::Regex;
use tracing::{info, warn};

use crate::models::{TaskKind, ARTIFACT_PREFIX};
use crate::services::storage::{object_key, StorageDestination};
use crate::utils::{BackupError, BackupResult};

/// Deletes old artifacts beyond a retention count
pub struct RetentionRotator;

impl RetentionRotator {
    /// Rotate with the default prefix and the extension of `kind`
    pub async fn rotate_task(
        destination: &dyn StorageDestination,
        sub_path: Option<&str>,
        task_id: i64,
        keep_count: i64,
        kind: TaskKind,
        current_key: Option<&str>,
    ) -> BackupResult<Vec<String>> {
        Self::rotate(
            destination,
            sub_path,
            task_id,
            keep_count,
            kind.artifact_extension(),
            ARTIFACT_PREFIX,
            current_key,
        )
        .await
    }

    /// Keep the `keep_count` newest `{prefix}{task_id}_*{extension}` files
    ///
    /// `current_key` is the artifact just uploaded; it is neither counted
    /// nor deleted. A `keep_count` of zero or less means unlimited and
    /// lists nothing. Returns the keys that were deleted.
    pub async fn rotate(
        destination: &dyn StorageDestination,
        sub_path: Option<&str>,
        task_id: i64,
        keep_count: i64,
        extension: &str,
        prefix: &str,
        current_key: Option<&str>,
    ) -> BackupResult<Vec<String>> {
        if keep_count <= 0 {
            return Ok(Vec::new());
        }

        let pattern = object_key(sub_path, &format!("{}{}_*{}", prefix, task_id, extension));
        let well_formed = artifact_name_regex(prefix, task_id, extension)?;

        let mut files: Vec<_> = destination
            .list_files(&pattern)
            .await?
            .into_iter()
            .filter(|object| Some(object.key.as_str()) != current_key)
            .filter(|object| {
                let name = object.key.rsplit('/').next().unwrap_or(&object.key);
                let ok = well_formed.is_match(name);
                if !ok {
                    warn!(key = %object.key, "Skipping artifact with unexpected name");
                }
                ok
            })
            .collect();

        let mut deleted = Vec::new();
        while files.len() as i64 > keep_count {
            let Some(oldest) = files.pop() else { break };
            match destination.delete_file(&oldest.key).await {
                Ok(()) => {
                    info!(key = %oldest.key, "Rotated old backup");
                    deleted.push(oldest.key);
                }
                Err(e) => warn!(key = %oldest.key, "Failed to delete old backup: {}", e),
            }
        }

        Ok(deleted)
    }
}

/// `{prefix}{task_id}_{14 digit timestamp}[_{suffix}]{extension}`
fn artifact_name_regex(prefix: &str, task_id: i64, extension: &str) -> BackupResult<Regex> {
    Regex::new(&format!(
        r"^{}{}_\d{{14}}(_[A-Za-z0-9][A-Za-z0-9_-]*)?{}$",
        regex::escape(prefix),
        task_id,
        regex::escape(extension)
    ))
    .map_err(|e| BackupError::storage(format!("Invalid rotation pattern: {}", e)))
}
