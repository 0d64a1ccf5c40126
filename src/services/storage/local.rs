//! Filesystem destination

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{key_matcher, sort_newest_first, StorageDestination, StoredObject};
use crate::utils::{BackupError, BackupResult};

/// Stores artifacts below a root directory on the local machine
pub struct LocalDestination {
    root: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl LocalDestination {
    pub fn new(root: impl Into<PathBuf>, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scratch_dir,
        }
    }

    /// Resolve a key below the root, refusing parent traversal
    fn resolve(&self, key: &str) -> BackupResult<PathBuf> {
        let relative = key.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            return Err(BackupError::storage(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageDestination for LocalDestination {
    async fn upload_file(&self, local_path: &Path, key: &str) -> BackupResult<()> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BackupError::storage(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| BackupError::storage(format!("Failed to copy to {:?}: {}", target, e)))?;

        debug!(path = ?target, "Stored artifact locally");
        Ok(())
    }

    async fn list_files(&self, pattern: &str) -> BackupResult<Vec<StoredObject>> {
        let matcher = key_matcher(pattern.trim_start_matches('/'))?;
        let dir_part = match pattern.trim_start_matches('/').rfind('/') {
            Some(idx) => &pattern.trim_start_matches('/')[..idx],
            None => "",
        };
        let dir = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::storage(format!(
                    "Failed to list {:?}: {}",
                    dir, e
                )))
            }
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::storage(format!("Failed to list {:?}: {}", dir, e)))?
        {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                warn!(path = ?entry.path(), "Skipping entry with non UTF-8 name");
                continue;
            };
            let key = if dir_part.is_empty() {
                name
            } else {
                format!("{}/{}", dir_part, name)
            };
            if !matcher.is_match(&key) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(key = %key, "Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            objects.push(StoredObject {
                key,
                last_modified,
                size: metadata.len(),
            });
        }

        sort_newest_first(&mut objects);
        Ok(objects)
    }

    async fn delete_file(&self, key: &str) -> BackupResult<()> {
        let target = self.resolve(key)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| BackupError::storage(format!("Failed to delete {:?}: {}", target, e)))
    }

    fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }
}
