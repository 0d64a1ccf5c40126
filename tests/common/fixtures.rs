//! Test fixtures for common test data
//!
//! Fixtures insert pre-defined rows (owner, server, destination, task)
//! into a test database.

use std::sync::atomic::{AtomicU32, Ordering};

use vanguard::db::{DbPool, DestinationRepository, ServerRepository, TaskRepository, UserRepository};
use vanguard::models::{
    BackupDestination, BackupTask, NewBackupDestination, NewBackupTask, NewRemoteServer,
    RemoteServer, TaskKind, User,
};
use vanguard::services::SecretCipher;

/// Key used to encrypt stored secrets in tests
pub const TEST_ENCRYPTION_KEY: &str = "test-encryption-key-0123456789";

static SERVER_COUNTER: AtomicU32 = AtomicU32::new(1);

pub fn test_cipher() -> SecretCipher {
    SecretCipher::new(TEST_ENCRYPTION_KEY).unwrap()
}

pub async fn create_user(pool: &DbPool) -> User {
    UserRepository::new(pool.clone())
        .create("Ada Lovelace", "ada@example.com")
        .await
        .unwrap()
}

/// Server with a unique address and an encrypted database password
pub async fn create_server(pool: &DbPool) -> RemoteServer {
    let n = SERVER_COUNTER.fetch_add(1, Ordering::SeqCst);
    ServerRepository::new(pool.clone())
        .create(&NewRemoteServer {
            label: format!("web-{}", n),
            ip_address: format!("10.0.{}.{}", n / 250, n % 250 + 1),
            ssh_port: 22,
            ssh_username: "deploy".to_string(),
            database_password: Some(test_cipher().encrypt("db-secret").unwrap()),
        })
        .await
        .unwrap()
}

pub async fn create_local_destination(pool: &DbPool, user: &User, root: &str) -> BackupDestination {
    DestinationRepository::new(pool.clone())
        .create(&NewBackupDestination {
            user_id: user.id,
            label: "Local archive".to_string(),
            destination_type: "local".to_string(),
            local_path: Some(root.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
}

/// Builder for backup tasks
pub struct TaskBuilder {
    task: NewBackupTask,
}

impl TaskBuilder {
    pub fn files(user: &User, server: &RemoteServer, destination: &BackupDestination) -> Self {
        Self {
            task: NewBackupTask {
                user_id: user.id,
                remote_server_id: server.id,
                backup_destination_id: destination.id,
                label: "Website files".to_string(),
                description: None,
                kind: TaskKind::Files,
                source_path: Some("/var/www/app".to_string()),
                database_name: None,
                excluded_database_tables: None,
                retention_count: 0,
                appended_file_name: None,
                store_path: None,
                isolated_username: None,
                isolated_password: None,
            },
        }
    }

    pub fn database(user: &User, server: &RemoteServer, destination: &BackupDestination) -> Self {
        let mut builder = Self::files(user, server, destination);
        builder.task.label = "Shop database".to_string();
        builder.task.kind = TaskKind::Database;
        builder.task.source_path = None;
        builder.task.database_name = Some("mydb".to_string());
        builder
    }

    pub fn label(mut self, label: &str) -> Self {
        self.task.label = label.to_string();
        self
    }

    pub fn source(mut self, path: &str) -> Self {
        self.task.source_path = Some(path.to_string());
        self
    }

    pub fn retention(mut self, count: i64) -> Self {
        self.task.retention_count = count;
        self
    }

    pub fn excluded_tables(mut self, csv: &str) -> Self {
        self.task.excluded_database_tables = Some(csv.to_string());
        self
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.task.appended_file_name = Some(suffix.to_string());
        self
    }

    pub fn store_path(mut self, path: &str) -> Self {
        self.task.store_path = Some(path.to_string());
        self
    }

    pub fn isolated(mut self, username: &str, password: &str) -> Self {
        self.task.isolated_username = Some(username.to_string());
        self.task.isolated_password = Some(test_cipher().encrypt(password).unwrap());
        self
    }

    pub async fn create(self, pool: &DbPool) -> BackupTask {
        TaskRepository::new(pool.clone())
            .create(&self.task)
            .await
            .unwrap()
    }
}
