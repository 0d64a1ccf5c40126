//! OpenSSH-backed remote sessions
//!
//! Drives the system `ssh` and `scp` binaries through `tokio::process`.
//! Password logins go through `sshpass -e` so the password never appears
//! in the local process list.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ssh_key::{LineEnding, PrivateKey};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SshConfig;
use crate::services::remote_session::{
    CommandOutput, KeyStore, RemoteFileStat, RemoteSession, SessionConnector, SessionCredential,
};
use crate::utils::validation::sh_quote;
use crate::utils::{BackupError, BackupResult};

/// `ssh` reserves this exit status for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Connector producing [`OpenSshSession`]s
pub struct OpenSshConnector {
    config: SshConfig,
}

impl OpenSshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for OpenSshConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> BackupResult<Box<dyn RemoteSession>> {
        // Reachability check only; authentication happens in `login`
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(BackupError::connection(format!(
                    "Cannot reach {}:{}: {}",
                    host, port, e
                )))
            }
            Err(_) => {
                return Err(BackupError::connection(format!(
                    "Timed out connecting to {}:{} after {}s",
                    host,
                    port,
                    timeout.as_secs()
                )))
            }
        }

        Ok(Box::new(OpenSshSession::new(
            self.config.clone(),
            host.to_string(),
            port,
        )))
    }
}

/// A session to one host, authenticated by `login`
pub struct OpenSshSession {
    config: SshConfig,
    host: String,
    port: u16,
    username: Option<String>,
    credential: Option<SessionCredential>,
    connected: bool,
    last_error: Mutex<Option<String>>,
}

impl OpenSshSession {
    pub fn new(config: SshConfig, host: String, port: u16) -> Self {
        Self {
            config,
            host,
            port,
            username: None,
            credential: None,
            connected: false,
            last_error: Mutex::new(None),
        }
    }

    fn destination(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    fn record_error(&self, message: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(message.into());
        }
    }

    /// Build an `ssh` or `scp` invocation with the session's options
    fn command(&self, scp_style: bool) -> Command {
        let binary = if scp_style {
            &self.config.scp_binary
        } else {
            &self.config.ssh_binary
        };

        let mut cmd = match &self.credential {
            Some(SessionCredential::Password(password)) => {
                let mut cmd = Command::new(&self.config.sshpass_binary);
                cmd.arg("-e").arg(binary).env("SSHPASS", password);
                cmd
            }
            _ => Command::new(binary),
        };

        if scp_style {
            cmd.arg("-P").arg(self.port.to_string()).arg("-q");
        } else {
            cmd.arg("-p").arg(self.port.to_string()).arg("-T");
        }

        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs))
            .arg("-o")
            .arg(format!(
                "StrictHostKeyChecking={}",
                self.config.strict_host_key_checking
            ))
            .arg("-o")
            .arg("ServerAliveInterval=30");

        match &self.credential {
            Some(SessionCredential::PrivateKey(path)) => {
                cmd.arg("-o")
                    .arg("BatchMode=yes")
                    .arg("-o")
                    .arg("IdentitiesOnly=yes")
                    .arg("-i")
                    .arg(path);
            }
            Some(SessionCredential::Password(_)) => {
                cmd.arg("-o")
                    .arg("PreferredAuthentications=password,keyboard-interactive")
                    .arg("-o")
                    .arg("PubkeyAuthentication=no");
            }
            Some(SessionCredential::Agent) | None => {
                cmd.arg("-o").arg("BatchMode=yes");
            }
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a prepared command under the per-command timeout
    async fn run(&self, mut cmd: Command, stdin: Option<&[u8]>) -> BackupResult<CommandOutput> {
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| {
            let msg = format!("Failed to spawn ssh client: {}", e);
            self.record_error(&msg);
            BackupError::connection(msg)
        })?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data).await.map_err(|e| {
                let msg = format!("Failed to stream data to remote host: {}", e);
                self.record_error(&msg);
                BackupError::connection(msg)
            })?;
            drop(pipe);
        }

        let timeout = self.config.command_timeout();
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let msg = format!("Failed to wait for ssh client: {}", e);
                self.record_error(&msg);
                return Err(BackupError::connection(msg));
            }
            Err(_) => {
                let msg = format!("Remote command timed out after {}s", timeout.as_secs());
                self.record_error(&msg);
                return Err(BackupError::connection(msg));
            }
        };

        let result = CommandOutput::new(
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
            output.status.code(),
        );

        if result.exit_code == Some(SSH_TRANSPORT_FAILURE) {
            let msg = format!("SSH transport failure: {}", result.stderr.trim());
            self.record_error(&msg);
            return Err(BackupError::connection(msg));
        }

        if !result.success() {
            self.record_error(result.combined());
        }

        Ok(result)
    }

    fn require_connected(&self) -> BackupResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BackupError::connection("Session is not logged in"))
        }
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.destination(), path)
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn login(&mut self, username: &str, credential: &SessionCredential) -> BackupResult<()> {
        self.username = Some(username.to_string());
        self.credential = Some(credential.clone());

        let mut cmd = self.command(false);
        cmd.arg(self.destination()).arg("true");
        let out = self.run(cmd, None).await?;

        if !out.success() {
            self.connected = false;
            return Err(BackupError::connection(format!(
                "Authentication failed: {}",
                out.combined()
            )));
        }

        info!(host = %self.host, user = %username, "SSH login succeeded");
        self.connected = true;
        Ok(())
    }

    async fn exec(&self, command: &str) -> BackupResult<CommandOutput> {
        self.require_connected()?;
        debug!(host = %self.host, "exec: {}", command);

        let mut cmd = self.command(false);
        cmd.arg(self.destination()).arg(command);
        self.run(cmd, None).await
    }

    async fn stat(&self, path: &str) -> Option<RemoteFileStat> {
        let out = self
            .exec(&format!("stat -c '%s %Y %F' {}", sh_quote(path)))
            .await
            .ok()?;
        if !out.success() {
            return None;
        }
        parse_stat_output(&out.stdout)
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> BackupResult<()> {
        self.require_connected()?;

        let mut cmd = self.command(true);
        cmd.arg(self.remote_spec(remote_path)).arg(local_path);
        let out = self.run(cmd, None).await?;
        if !out.success() {
            return Err(BackupError::connection(format!(
                "Failed to download {}: {}",
                remote_path,
                out.combined()
            )));
        }
        Ok(())
    }

    async fn put(&self, remote_path: &str, data: &[u8]) -> BackupResult<()> {
        self.require_connected()?;

        let mut cmd = self.command(false);
        cmd.arg(self.destination())
            .arg(format!("cat > {}", sh_quote(remote_path)));
        let out = self.run(cmd, Some(data)).await?;
        if !out.success() {
            return Err(BackupError::connection(format!(
                "Failed to write {}: {}",
                remote_path,
                out.combined()
            )));
        }
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> BackupResult<()> {
        let flags = if recursive { "-rf" } else { "-f" };
        let out = self.exec(&format!("rm {} {}", flags, sh_quote(path))).await?;
        if !out.success() {
            return Err(BackupError::connection(format!(
                "Failed to delete {}: {}",
                path,
                out.combined()
            )));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.credential = None;
    }
}

/// Parse `stat -c '%s %Y %F'` output
fn parse_stat_output(stdout: &str) -> Option<RemoteFileStat> {
    let line = stdout.lines().next()?.trim();
    let mut parts = line.splitn(3, ' ');
    let size = parts.next()?.parse().ok()?;
    let modified = parts.next().and_then(|m| m.parse().ok());
    let kind = parts.next().unwrap_or_default();

    Some(RemoteFileStat {
        size,
        is_dir: kind == "directory",
        modified,
    })
}

/// Private key loaded from the configured keys directory
///
/// The key is decrypted with the configured passphrase and written once to
/// a 0600 temporary file that lives as long as the store.
pub struct FileKeyStore {
    key_path: PathBuf,
    passphrase: Option<String>,
    development_mode: bool,
    materialized: Mutex<Option<TempPath>>,
}

impl FileKeyStore {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            key_path: config.private_key_path(),
            passphrase: config.passphrase.clone(),
            development_mode: config.development_mode,
            materialized: Mutex::new(None),
        }
    }

    /// Whether the configured private key file exists
    pub fn key_exists(&self) -> bool {
        self.key_path.is_file()
    }

    fn materialize(&self) -> BackupResult<PathBuf> {
        let mut guard = self
            .materialized
            .lock()
            .map_err(|_| BackupError::config("Key store lock poisoned"))?;

        if let Some(path) = guard.as_ref() {
            return Ok(path.to_path_buf());
        }

        let key = PrivateKey::read_openssh_file(&self.key_path).map_err(|e| {
            BackupError::config(format!(
                "Failed to read SSH private key {:?}: {}",
                self.key_path, e
            ))
        })?;

        let key = if key.is_encrypted() {
            let passphrase = self
                .passphrase
                .as_deref()
                .ok_or_else(|| BackupError::config("SSH key passphrase is not configured"))?;
            key.decrypt(passphrase)
                .map_err(|e| BackupError::config(format!("Failed to decrypt SSH key: {}", e)))?
        } else {
            key
        };

        let pem = key
            .to_openssh(LineEnding::LF)
            .map_err(|e| BackupError::config(format!("Failed to encode SSH key: {}", e)))?;

        let mut file = tempfile::Builder::new()
            .prefix("vanguard-key-")
            .tempfile()
            .map_err(|e| BackupError::config(format!("Failed to create key file: {}", e)))?;
        file.write_all(pem.as_bytes())
            .map_err(|e| BackupError::config(format!("Failed to write key file: {}", e)))?;

        let path = file.into_temp_path();
        let result = path.to_path_buf();
        *guard = Some(path);
        Ok(result)
    }
}

impl KeyStore for FileKeyStore {
    fn credential(&self) -> BackupResult<SessionCredential> {
        if !self.development_mode && self.passphrase.is_none() {
            return Err(BackupError::config("SSH key passphrase is not configured"));
        }

        if !self.key_exists() {
            if self.development_mode {
                warn!(
                    path = ?self.key_path,
                    "SSH key missing; falling back to agent identities in development mode"
                );
                return Ok(SessionCredential::Agent);
            }
            return Err(BackupError::config(format!(
                "SSH private key not found at {:?}",
                self.key_path
            )));
        }

        self.materialize().map(SessionCredential::PrivateKey)
    }
}
