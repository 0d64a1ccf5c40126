//! Remote server models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known connectivity of a remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
    Checking,
    Unknown,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Online => write!(f, "online"),
            ConnectionStatus::Offline => write!(f, "offline"),
            ConnectionStatus::Checking => write!(f, "checking"),
            ConnectionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<String> for ConnectionStatus {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "online" => ConnectionStatus::Online,
            "offline" => ConnectionStatus::Offline,
            "checking" => ConnectionStatus::Checking,
            _ => ConnectionStatus::Unknown,
        }
    }
}

/// Remote server record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServer {
    pub id: i64,
    pub label: String,
    pub ip_address: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    /// Encrypted database password used by dump tasks
    #[serde(skip_serializing)]
    pub database_password: Option<String>,
    pub connectivity_status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteServer {
    pub fn is_online(&self) -> bool {
        self.connectivity_status == ConnectionStatus::Online
    }
}

/// New server to insert
#[derive(Debug, Clone, Deserialize)]
pub struct NewRemoteServer {
    pub label: String,
    pub ip_address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_username: String,
    #[serde(default)]
    pub database_password: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Response for a connectivity check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityResponse {
    pub id: i64,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
