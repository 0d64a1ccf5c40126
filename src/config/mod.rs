//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    /// SMTP settings for failure e-mails; mail is disabled when absent
    #[serde(default)]
    pub mail: Option<MailConfig>,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://./data/vanguard.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
    /// Maximum number of log files to keep (0 = unlimited)
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/vanguard")
}

fn default_log_prefix() -> String {
    "vanguard".to_string()
}

fn default_log_rotation() -> bool {
    true
}

fn default_max_log_files() -> usize {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
            max_log_files: default_max_log_files(),
        }
    }
}

/// SSH client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    /// Directory holding the service's private key
    #[serde(default = "default_ssh_keys_dir")]
    pub keys_dir: PathBuf,
    #[serde(default = "default_private_key_name")]
    pub private_key_name: String,
    /// Passphrase protecting the private key
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_ssh_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Applied to every remote command
    #[serde(default = "default_ssh_command_timeout")]
    pub command_timeout_secs: u64,
    /// Allows running without a key or passphrase
    #[serde(default)]
    pub development_mode: bool,
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: PathBuf,
    #[serde(default = "default_scp_binary")]
    pub scp_binary: PathBuf,
    #[serde(default = "default_sshpass_binary")]
    pub sshpass_binary: PathBuf,
    /// Value passed as `StrictHostKeyChecking`
    #[serde(default = "default_host_key_checking")]
    pub strict_host_key_checking: String,
}

fn default_ssh_keys_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ssh"))
        .unwrap_or_else(|| PathBuf::from("/etc/vanguard/ssh"))
}

fn default_private_key_name() -> String {
    "id_ed25519".to_string()
}

fn default_ssh_connect_timeout() -> u64 {
    10
}

fn default_ssh_command_timeout() -> u64 {
    120
}

fn default_ssh_binary() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_scp_binary() -> PathBuf {
    PathBuf::from("scp")
}

fn default_sshpass_binary() -> PathBuf {
    PathBuf::from("sshpass")
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

impl SshConfig {
    pub fn private_key_path(&self) -> PathBuf {
        self.keys_dir.join(&self.private_key_name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            keys_dir: default_ssh_keys_dir(),
            private_key_name: default_private_key_name(),
            passphrase: None,
            connect_timeout_secs: default_ssh_connect_timeout(),
            command_timeout_secs: default_ssh_command_timeout(),
            development_mode: false,
            ssh_binary: default_ssh_binary(),
            scp_binary: default_scp_binary(),
            sshpass_binary: default_sshpass_binary(),
            strict_host_key_checking: default_host_key_checking(),
        }
    }
}

/// Backup execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    /// Directory on the remote host where artifacts are staged
    #[serde(default = "default_remote_temp_dir")]
    pub remote_temp_dir: String,
    /// Local directory for downloaded artifacts (system temp dir when unset)
    #[serde(default)]
    pub local_temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Directories excluded from every file archive, relative to the source
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
}

fn default_remote_temp_dir() -> String {
    "/tmp".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            remote_temp_dir: default_remote_temp_dir(),
            local_temp_dir: None,
            retry: RetryConfig::default(),
            exclude_dirs: Vec::new(),
        }
    }
}

/// Bounded retry for archive creation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay(),
        }
    }
}

/// SMTP configuration for failure e-mails
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// Use STARTTLS instead of implicit TLS
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    pub from_address: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

/// Key used to encrypt stored secrets
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub key: String,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with VANGUARD_)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("VANGUARD_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/vanguard/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("vanguard/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("VANGUARD_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("VANGUARD_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("VANGUARD_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        if let Ok(dir) = std::env::var("VANGUARD_SSH_KEYS_DIR") {
            self.ssh.keys_dir = PathBuf::from(dir);
        }
        if let Ok(passphrase) = std::env::var("VANGUARD_SSH_PASSPHRASE") {
            self.ssh.passphrase = Some(passphrase);
        }
        if let Ok(dev) = std::env::var("VANGUARD_DEVELOPMENT_MODE") {
            self.ssh.development_mode = matches!(dev.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(dir) = std::env::var("VANGUARD_REMOTE_TEMP_DIR") {
            self.backup.remote_temp_dir = dir;
        }

        if let Ok(key) = std::env::var("VANGUARD_ENCRYPTION_KEY") {
            self.encryption.key = key;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL must not be empty");
        }

        if self.encryption.key.len() < 16 {
            anyhow::bail!("Encryption key must be at least 16 characters long");
        }

        if self.backup.retry.max_attempts == 0 {
            anyhow::bail!("backup.retry.max_attempts must be at least 1");
        }

        if self.ssh.command_timeout_secs == 0 {
            anyhow::bail!("ssh.command_timeout_secs must be greater than zero");
        }

        if !self.backup.remote_temp_dir.starts_with('/') {
            anyhow::bail!(
                "backup.remote_temp_dir must be an absolute path: {}",
                self.backup.remote_temp_dir
            );
        }

        if !self.ssh.development_mode && self.ssh.passphrase.is_none() {
            tracing::warn!("No SSH key passphrase configured; key-based logins will fail");
        }

        Ok(())
    }
}
