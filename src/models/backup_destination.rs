//! Backup destination models

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::BackupError;

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    Local,
    S3,
    CustomS3,
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationType::Local => write!(f, "local"),
            DestinationType::S3 => write!(f, "s3"),
            DestinationType::CustomS3 => write!(f, "custom_s3"),
        }
    }
}

impl FromStr for DestinationType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(DestinationType::Local),
            "s3" => Ok(DestinationType::S3),
            "custom_s3" => Ok(DestinationType::CustomS3),
            other => Err(BackupError::config(format!(
                "Unsupported backup destination type: {}",
                other
            ))),
        }
    }
}

/// Backup destination record from database
///
/// The type is kept as stored text; it is only parsed when a storage
/// client is built so that an unknown type fails that run instead of the
/// whole listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDestination {
    pub id: i64,
    pub user_id: i64,
    pub label: String,
    pub destination_type: String,
    #[serde(skip_serializing)]
    pub s3_access_key: Option<String>,
    #[serde(skip_serializing)]
    pub s3_secret_key: Option<String>,
    pub s3_bucket_name: Option<String>,
    pub s3_region: Option<String>,
    pub custom_s3_endpoint: Option<String>,
    pub path_style_endpoint: bool,
    /// Root directory for `local` destinations
    pub local_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupDestination {
    pub fn kind(&self) -> Result<DestinationType, BackupError> {
        self.destination_type.parse()
    }
}

/// New destination to insert (secrets already encrypted)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBackupDestination {
    pub user_id: i64,
    pub label: String,
    pub destination_type: String,
    #[serde(default)]
    pub s3_access_key: Option<String>,
    #[serde(default)]
    pub s3_secret_key: Option<String>,
    #[serde(default)]
    pub s3_bucket_name: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub custom_s3_endpoint: Option<String>,
    #[serde(default)]
    pub path_style_endpoint: bool,
    #[serde(default)]
    pub local_path: Option<String>,
}
