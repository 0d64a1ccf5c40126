//! Backup destination repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{BackupDestination, NewBackupDestination};

use super::parse_datetime;

/// Repository for backup destinations
pub struct DestinationRepository {
    pool: SqlitePool,
}

impl DestinationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, destination: &NewBackupDestination) -> Result<BackupDestination> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO backup_destinations (
                user_id, label, destination_type, s3_access_key, s3_secret_key,
                s3_bucket_name, s3_region, custom_s3_endpoint, path_style_endpoint,
                local_path, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
        )
        .bind(destination.user_id)
        .bind(&destination.label)
        .bind(&destination.destination_type)
        .bind(&destination.s3_access_key)
        .bind(&destination.s3_secret_key)
        .bind(&destination.s3_bucket_name)
        .bind(&destination.s3_region)
        .bind(&destination.custom_s3_endpoint)
        .bind(destination.path_style_endpoint)
        .bind(&destination.local_path)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to create backup destination")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("Backup destination vanished after insert")
    }

    pub async fn get(&self, id: i64) -> Result<Option<BackupDestination>> {
        let row = sqlx::query_as::<_, DestinationRow>(
            "SELECT * FROM backup_destinations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch backup destination")?;

        Ok(row.map(|r| r.into()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DestinationRow {
    id: i64,
    user_id: i64,
    label: String,
    destination_type: String,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
    s3_bucket_name: Option<String>,
    s3_region: Option<String>,
    custom_s3_endpoint: Option<String>,
    path_style_endpoint: bool,
    local_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<DestinationRow> for BackupDestination {
    fn from(row: DestinationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            label: row.label,
            destination_type: row.destination_type,
            s3_access_key: row.s3_access_key,
            s3_secret_key: row.s3_secret_key,
            s3_bucket_name: row.s3_bucket_name,
            s3_region: row.s3_region,
            custom_s3_endpoint: row.custom_s3_endpoint,
            path_style_endpoint: row.path_style_endpoint,
            local_path: row.local_path,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}
