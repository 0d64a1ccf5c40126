//! On-demand SSH connectivity checks for remote servers

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::ServerRepository;
use crate::models::{ConnectionStatus, ConnectivityResponse, RemoteServer};
use crate::services::remote_session::SessionFactory;
use crate::utils::BackupResult;

pub struct ConnectivityChecker {
    sessions: Arc<SessionFactory>,
    servers: ServerRepository,
}

impl ConnectivityChecker {
    pub fn new(sessions: Arc<SessionFactory>, servers: ServerRepository) -> Self {
        Self { sessions, servers }
    }

    /// Log in to the server and record whether that worked
    pub async fn check(&self, server: &RemoteServer) -> BackupResult<ConnectivityResponse> {
        self.servers
            .update_connectivity_status(server.id, ConnectionStatus::Checking)
            .await?;

        match self.sessions.open(server, None).await {
            Ok(mut session) => {
                session.disconnect().await;
                // the stored status is `checking` at this point
                self.servers
                    .update_connectivity_status(server.id, ConnectionStatus::Online)
                    .await?;
                info!(server_id = server.id, "Server is reachable");
                Ok(ConnectivityResponse {
                    id: server.id,
                    status: ConnectionStatus::Online,
                    error: None,
                })
            }
            Err(e) => {
                warn!(server_id = server.id, "Connectivity check failed: {}", e);
                self.servers
                    .update_connectivity_status(server.id, ConnectionStatus::Offline)
                    .await?;
                Ok(ConnectivityResponse {
                    id: server.id,
                    status: ConnectionStatus::Offline,
                    error: Some(e.to_string()),
                })
            }
        }
    }
}
