//! S3 and S3-compatible destinations

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{glob_prefix, key_matcher, sort_newest_first, StorageDestination, StoredObject};
use crate::models::{BackupDestination, DestinationType};
use crate::services::credentials::SecretCipher;
use crate::utils::{BackupError, BackupResult};

const DEFAULT_REGION: &str = "us-east-1";

/// Decrypted connection settings for a bucket
#[derive(Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: Option<String>,
    pub path_style: bool,
}

impl S3Settings {
    pub fn from_destination(
        destination: &BackupDestination,
        cipher: &SecretCipher,
        kind: DestinationType,
    ) -> BackupResult<Self> {
        let missing = |field: &str| {
            BackupError::config(format!(
                "Destination {} is missing {}",
                destination.label, field
            ))
        };

        let bucket = destination
            .s3_bucket_name
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| missing("a bucket name"))?;
        let access_key = cipher
            .decrypt_optional(destination.s3_access_key.as_deref())?
            .ok_or_else(|| missing("an access key"))?;
        let secret_key = cipher
            .decrypt_optional(destination.s3_secret_key.as_deref())?
            .ok_or_else(|| missing("a secret key"))?;

        let endpoint = match kind {
            DestinationType::CustomS3 => Some(
                destination
                    .custom_s3_endpoint
                    .clone()
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| missing("a custom endpoint"))?,
            ),
            _ => None,
        };

        Ok(Self {
            bucket,
            region: destination
                .s3_region
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key,
            secret_key,
            endpoint,
            path_style: destination.path_style_endpoint,
        })
    }
}

/// Stores artifacts in a bucket
pub struct S3Destination {
    client: Client,
    bucket: String,
    scratch_dir: Option<PathBuf>,
}

impl S3Destination {
    /// Create a client with static credentials
    pub async fn connect(settings: S3Settings, scratch_dir: Option<PathBuf>) -> Self {
        let credentials = Credentials::new(
            settings.access_key,
            settings.secret_key,
            None,
            None,
            "vanguard-destination",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = settings.endpoint {
            debug!("Using custom S3 endpoint: {}", endpoint);
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(settings.path_style);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            scratch_dir,
        }
    }
}

#[async_trait]
impl StorageDestination for S3Destination {
    async fn upload_file(&self, local_path: &Path, key: &str) -> BackupResult<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| BackupError::storage(format!("Failed to read {:?}: {}", local_path, e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                BackupError::storage(format!(
                    "Upload to s3://{}/{} failed: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }

    async fn list_files(&self, pattern: &str) -> BackupResult<Vec<StoredObject>> {
        let matcher = key_matcher(pattern)?;
        let prefix = glob_prefix(pattern);

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let resp = request.send().await.map_err(|e| {
                BackupError::storage(format!(
                    "Listing s3://{}/{} failed: {}",
                    self.bucket,
                    prefix,
                    DisplayErrorContext(&e)
                ))
            })?;

            for object in resp.contents() {
                let Some(key) = object.key() else { continue };
                if !matcher.is_match(key) {
                    continue;
                }
                let last_modified = object
                    .last_modified()
                    .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_default();

                objects.push(StoredObject {
                    key: key.to_string(),
                    last_modified,
                    size: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(String::from);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        sort_newest_first(&mut objects);
        Ok(objects)
    }

    async fn delete_file(&self, key: &str) -> BackupResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                BackupError::storage(format!(
                    "Deleting s3://{}/{} failed: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }
}
