//! Storage destinations for backup artifacts
//!
//! A destination can upload, list and delete objects. Artifacts are first
//! pulled from the remote host into a scoped local temp file, then handed
//! to the backend.

mod local;
mod s3;

pub use local::LocalDestination;
pub use s3::S3Destination;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;
use tracing::{debug, info};

use crate::models::{BackupDestination, DestinationType};
use crate::services::credentials::SecretCipher;
use crate::services::remote_session::RemoteSession;
use crate::utils::{BackupError, BackupResult};

/// An object held by a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[async_trait]
pub trait StorageDestination: Send + Sync {
    /// Upload a local file under `key`
    async fn upload_file(&self, local_path: &Path, key: &str) -> BackupResult<()>;

    /// Objects whose key matches a glob (`*` and `?`), newest first
    async fn list_files(&self, pattern: &str) -> BackupResult<Vec<StoredObject>>;

    async fn delete_file(&self, key: &str) -> BackupResult<()>;

    /// Where downloaded artifacts are staged; system temp dir when `None`
    fn scratch_dir(&self) -> Option<&Path> {
        None
    }

    /// Pull a remote file and upload it as `storage_sub_path/target_file_name`
    ///
    /// The local copy is removed when this returns, on every path. Returns
    /// the number of bytes uploaded.
    async fn stream_upload(
        &self,
        session: &dyn RemoteSession,
        remote_source_path: &str,
        target_file_name: &str,
        storage_sub_path: Option<&str>,
    ) -> BackupResult<u64> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vanguard-artifact-");
        let temp = match self.scratch_dir() {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| BackupError::storage(format!("Failed to create local temp file: {}", e)))?
        .into_temp_path();

        session.get(remote_source_path, &temp).await.map_err(|e| {
            BackupError::storage(format!("Failed to download {}: {}", remote_source_path, e))
        })?;

        let size = tokio::fs::metadata(&temp)
            .await
            .map(|m| m.len())
            .map_err(|e| {
                BackupError::storage(format!("Downloaded artifact is unreadable: {}", e))
            })?;

        let key = object_key(storage_sub_path, target_file_name);
        debug!(key = %key, size, "Uploading artifact");
        self.upload_file(&temp, &key).await?;
        info!(key = %key, size, "Artifact uploaded");

        drop(temp);
        Ok(size)
    }
}

/// Join an optional sub-path and a file name into an object key
pub fn object_key(sub_path: Option<&str>, file_name: &str) -> String {
    match sub_path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, file_name),
        None => file_name.to_string(),
    }
}

/// Compile a key glob; `*` and `?` never cross a `/`
pub fn key_matcher(pattern: &str) -> BackupResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| BackupError::storage(format!("Invalid file pattern {}: {}", pattern, e)))
}

/// Literal part of a glob before the first wildcard
pub fn glob_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

/// Sort newest first, breaking ties by key for a stable order
pub(crate) fn sort_newest_first(objects: &mut [StoredObject]) {
    objects.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
}

/// Build the storage client for a destination record
///
/// Unsupported types and missing fields are configuration errors.
pub async fn build_destination(
    destination: &BackupDestination,
    cipher: &SecretCipher,
    scratch_dir: Option<PathBuf>,
) -> BackupResult<Arc<dyn StorageDestination>> {
    match destination.kind()? {
        DestinationType::Local => {
            let root = destination
                .local_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    BackupError::config(format!(
                        "Local destination {} has no path",
                        destination.label
                    ))
                })?;
            Ok(Arc::new(LocalDestination::new(root, scratch_dir)))
        }
        kind @ (DestinationType::S3 | DestinationType::CustomS3) => {
            let settings = s3::S3Settings::from_destination(destination, cipher, kind)?;
            Ok(Arc::new(S3Destination::connect(settings, scratch_dir).await))
        }
    }
}

/// Resolves destination records into storage clients
#[async_trait]
pub trait DestinationFactory: Send + Sync {
    async fn build(&self, destination: &BackupDestination)
        -> BackupResult<Arc<dyn StorageDestination>>;
}

/// Builds real clients, decrypting stored credentials
pub struct ConfiguredDestinationFactory {
    cipher: SecretCipher,
    scratch_dir: Option<PathBuf>,
}

impl ConfiguredDestinationFactory {
    pub fn new(cipher: SecretCipher, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            cipher,
            scratch_dir,
        }
    }
}

#[async_trait]
impl DestinationFactory for ConfiguredDestinationFactory {
    async fn build(
        &self,
        destination: &BackupDestination,
    ) -> BackupResult<Arc<dyn StorageDestination>> {
        build_destination(destination, &self.cipher, self.scratch_dir.clone()).await
    }
}
