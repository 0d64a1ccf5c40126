//! Remote server repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{ConnectionStatus, NewRemoteServer, RemoteServer};

use super::{parse_datetime, parse_optional_datetime};

/// Repository for remote server operations
pub struct ServerRepository {
    pool: SqlitePool,
}

impl ServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, server: &NewRemoteServer) -> Result<RemoteServer> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO remote_servers (
                label, ip_address, ssh_port, ssh_username, database_password,
                connectivity_status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'unknown', ?6, ?6)
            "#,
        )
        .bind(&server.label)
        .bind(&server.ip_address)
        .bind(server.ssh_port as i64)
        .bind(&server.ssh_username)
        .bind(&server.database_password)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to create remote server")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("Remote server vanished after insert")
    }

    pub async fn get(&self, id: i64) -> Result<Option<RemoteServer>> {
        let row = sqlx::query_as::<_, ServerRow>("SELECT * FROM remote_servers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch remote server")?;

        Ok(row.map(|r| r.into()))
    }

    /// Store a connectivity result; `online` also stamps `last_connected_at`
    pub async fn update_connectivity_status(
        &self,
        id: i64,
        status: ConnectionStatus,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let query = if status == ConnectionStatus::Online {
            r#"
            UPDATE remote_servers
            SET connectivity_status = ?1, last_connected_at = ?2, updated_at = ?2
            WHERE id = ?3
            "#
        } else {
            r#"
            UPDATE remote_servers
            SET connectivity_status = ?1, updated_at = ?2
            WHERE id = ?3
            "#
        };

        sqlx::query(query)
            .bind(status.to_string())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update connectivity status")?;

        Ok(())
    }

    /// Mark a server online after a successful session, unless it already is
    pub async fn mark_online_if_needed(&self, server: &RemoteServer) -> Result<bool> {
        if server.is_online() {
            return Ok(false);
        }
        self.update_connectivity_status(server.id, ConnectionStatus::Online)
            .await?;
        Ok(true)
    }
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    id: i64,
    label: String,
    ip_address: String,
    ssh_port: i64,
    ssh_username: String,
    database_password: Option<String>,
    connectivity_status: String,
    last_connected_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<ServerRow> for RemoteServer {
    fn from(row: ServerRow) -> Self {
        Self {
            id: row.id,
            label: row.label,
            ip_address: row.ip_address,
            ssh_port: u16::try_from(row.ssh_port).unwrap_or(22),
            ssh_username: row.ssh_username,
            database_password: row.database_password,
            connectivity_status: ConnectionStatus::from(row.connectivity_status),
            last_connected_at: parse_optional_datetime(row.last_connected_at),
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}
