//! Remote session abstraction
//!
//! Everything the backup pipeline does on a remote host goes through
//! [`RemoteSession`]. The concrete OpenSSH adapter lives in
//! [`crate::services::ssh`]; tests supply in-memory sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::db::ServerRepository;
use crate::models::{BackupTask, RemoteServer};
use crate::services::credentials::SecretCipher;
use crate::utils::{BackupError, BackupResult};

/// Captured result of a command that ran on the remote host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the transport could not report an exit status
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn new(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Metadata for a remote path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileStat {
    pub size: u64,
    pub is_dir: bool,
    /// Modification time as a unix timestamp
    pub modified: Option<i64>,
}

/// How a session authenticates
#[derive(Clone)]
pub enum SessionCredential {
    /// Unencrypted private key file readable only by this process
    PrivateKey(PathBuf),
    /// Isolated password login
    Password(String),
    /// Whatever the local SSH agent and default identities offer
    Agent,
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCredential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
            SessionCredential::Password(_) => f.write_str("Password(<redacted>)"),
            SessionCredential::Agent => f.write_str("Agent"),
        }
    }
}

/// An open connection to a remote host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Authenticate; must succeed before any other operation
    async fn login(&mut self, username: &str, credential: &SessionCredential) -> BackupResult<()>;

    /// Run a shell command. `Err` means the command could not be run at all.
    async fn exec(&self, command: &str) -> BackupResult<CommandOutput>;

    /// `None` on any stat failure
    async fn stat(&self, path: &str) -> Option<RemoteFileStat>;

    /// Download a remote file to a local path
    async fn get(&self, remote_path: &str, local_path: &Path) -> BackupResult<()>;

    /// Write bytes to a remote file
    async fn put(&self, remote_path: &str, data: &[u8]) -> BackupResult<()>;

    async fn delete(&self, path: &str, recursive: bool) -> BackupResult<()>;

    fn is_connected(&self) -> bool;

    /// Most recent transport or command error
    fn last_error(&self) -> Option<String>;

    async fn disconnect(&mut self) {}
}

/// Opens unauthenticated sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> BackupResult<Box<dyn RemoteSession>>;
}

/// Source of the service's SSH identity
pub trait KeyStore: Send + Sync {
    fn credential(&self) -> BackupResult<SessionCredential>;
}

/// Builds logged-in sessions for backup runs
///
/// Credentials are resolved before anything touches the network, so
/// configuration problems surface without remote side effects.
pub struct SessionFactory {
    connector: Arc<dyn SessionConnector>,
    key_store: Arc<dyn KeyStore>,
    cipher: SecretCipher,
    servers: ServerRepository,
    connect_timeout: Duration,
}

impl SessionFactory {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        key_store: Arc<dyn KeyStore>,
        cipher: SecretCipher,
        servers: ServerRepository,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            key_store,
            cipher,
            servers,
            connect_timeout,
        }
    }

    /// Username and credential for a task, honouring isolated credentials
    pub fn resolve_credential(
        &self,
        server: &RemoteServer,
        task: Option<&BackupTask>,
    ) -> BackupResult<(String, SessionCredential)> {
        if let Some(task) = task.filter(|t| t.has_isolated_credentials()) {
            let username = task.isolated_username.clone().unwrap_or_default();
            let password = self
                .cipher
                .decrypt_optional(task.isolated_password.as_deref())?
                .ok_or_else(|| BackupError::config("Isolated password is empty"))?;
            return Ok((username, SessionCredential::Password(password)));
        }

        Ok((server.ssh_username.clone(), self.key_store.credential()?))
    }

    /// Connect and log in, marking the server online on success
    pub async fn open(
        &self,
        server: &RemoteServer,
        task: Option<&BackupTask>,
    ) -> BackupResult<Box<dyn RemoteSession>> {
        let (username, credential) = self.resolve_credential(server, task)?;

        debug!(
            server_id = server.id,
            host = %server.ip_address,
            port = server.ssh_port,
            "Opening remote session"
        );

        let mut session = self
            .connector
            .connect(&server.ip_address, server.ssh_port, self.connect_timeout)
            .await?;

        session.login(&username, &credential).await.map_err(|e| {
            BackupError::connection(format!(
                "Failed to log in to {} as {}: {}",
                server.ip_address, username, e
            ))
        })?;

        if let Err(e) = self.servers.mark_online_if_needed(server).await {
            warn!(server_id = server.id, "Failed to update connectivity status: {:#}", e);
        }

        Ok(session)
    }
}
