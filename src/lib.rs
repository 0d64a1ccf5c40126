//! Vanguard Library
//!
//! Remote backup execution engine: archives directories or dumps databases
//! on remote hosts over SSH and ships the artifacts to local or
//! S3-compatible destinations.

use std::sync::Arc;

use anyhow::{Context, Result};

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;

use db::{ServerRepository, TaskLogRepository, TaskRepository};
use services::{
    BackupOrchestrator, ConfiguredDestinationFactory, ConnectivityChecker, DestinationFactory,
    FileKeyStore, KeyStore, Mailer, NotificationService, OpenSshConnector, OrchestratorSettings,
    SecretCipher, SessionConnector, SessionFactory,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// Runs backup tasks
    pub orchestrator: Arc<BackupOrchestrator>,
    /// On-demand server checks
    pub connectivity: Arc<ConnectivityChecker>,
    /// Live run events
    pub notifications: NotificationService,
}

impl AppState {
    /// Wire the production components: system OpenSSH, the configured key
    /// store, real storage clients and SMTP when mail is configured.
    pub fn from_config(config: AppConfig, db: DbPool) -> Result<Self> {
        let cipher = SecretCipher::new(config.encryption.key.clone())
            .context("Invalid encryption configuration")?;

        let mailer = match &config.mail {
            Some(mail) => Some(Mailer::from_config(mail).context("Invalid mail configuration")?),
            None => None,
        };

        let connector = Arc::new(OpenSshConnector::new(config.ssh.clone()));
        let key_store = Arc::new(FileKeyStore::new(&config.ssh));
        let storage = Arc::new(ConfiguredDestinationFactory::new(
            cipher,
            config.backup.local_temp_dir.clone(),
        ));

        Self::with_components(
            config,
            db,
            connector,
            key_store,
            storage,
            NotificationService::new(mailer),
        )
    }

    /// Wire the state around caller-supplied transport and storage
    pub fn with_components(
        config: AppConfig,
        db: DbPool,
        connector: Arc<dyn SessionConnector>,
        key_store: Arc<dyn KeyStore>,
        storage: Arc<dyn DestinationFactory>,
        notifications: NotificationService,
    ) -> Result<Self> {
        let cipher = SecretCipher::new(config.encryption.key.clone())
            .context("Invalid encryption configuration")?;

        let sessions = Arc::new(SessionFactory::new(
            connector,
            key_store,
            cipher.clone(),
            ServerRepository::new(db.clone()),
            config.ssh.connect_timeout(),
        ));

        let orchestrator = Arc::new(BackupOrchestrator::new(
            db.clone(),
            Arc::clone(&sessions),
            storage,
            Arc::new(notifications.clone()),
            cipher,
            OrchestratorSettings::from(&config.backup),
        ));

        let connectivity = Arc::new(ConnectivityChecker::new(
            sessions,
            ServerRepository::new(db.clone()),
        ));

        Ok(Self {
            config,
            db,
            orchestrator,
            connectivity,
            notifications,
        })
    }

    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.db.clone())
    }

    pub fn task_logs(&self) -> TaskLogRepository {
        TaskLogRepository::new(self.db.clone())
    }

    pub fn servers(&self) -> ServerRepository {
        ServerRepository::new(self.db.clone())
    }
}
