//! Backup engine services

pub mod archive;
pub mod connectivity;
pub mod credentials;
pub mod database_dump;
pub mod notification;
pub mod orchestrator;
pub mod probe;
pub mod remote_session;
pub mod rotation;
pub mod ssh;
pub mod storage;

pub use archive::{ArchiveProducer, RetryPolicy};
pub use connectivity::ConnectivityChecker;
pub use credentials::SecretCipher;
pub use database_dump::DatabaseDumpProducer;
pub use notification::{BackupEvent, Mailer, NotificationService, NotificationSink};
pub use orchestrator::{BackupOrchestrator, OrchestratorSettings, RunOutcome};
pub use probe::DatabaseEngine;
pub use remote_session::{
    CommandOutput, KeyStore, RemoteFileStat, RemoteSession, SessionConnector, SessionCredential,
    SessionFactory,
};
pub use rotation::RetentionRotator;
pub use ssh::{FileKeyStore, OpenSshConnector, OpenSshSession};
pub use storage::{
    ConfiguredDestinationFactory, DestinationFactory, LocalDestination, S3Destination,
    StorageDestination, StoredObject,
};
