//! Mock collaborators for testing
//!
//! Provides an in-memory remote host that answers the commands the backup
//! pipeline issues, plus recording stand-ins for notifications and storage.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use vanguard::models::{BackupDestination, TaskStatus, User};
use vanguard::services::{
    CommandOutput, DatabaseEngine, DestinationFactory, KeyStore, LocalDestination,
    NotificationSink, RemoteFileStat, RemoteSession, SessionConnector, SessionCredential,
    StorageDestination, StoredObject,
};
use vanguard::utils::{BackupError, BackupResult};

/// Bytes written by the fake `zip`
pub const FAKE_ZIP_BYTES: &[u8] = b"PK\x03\x04fake-archive-contents";

/// Bytes written by the fake dump tools
pub const FAKE_DUMP_BYTES: &[u8] = b"-- dump\nCREATE TABLE users (id int);\n";

/// Behaviour and recorded traffic of the fake remote host
#[derive(Debug)]
pub struct HostState {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    pub commands: Vec<String>,
    pub deleted: Vec<String>,
    pub logins: Vec<(String, SessionCredential)>,
    pub disconnects: u32,
    pub last_error: Option<String>,

    pub du_available: bool,
    pub dir_size: u64,
    pub free_space: u64,
    pub engine: Option<DatabaseEngine>,
    /// Number of zip invocations that fail before one succeeds
    pub zip_failures: u32,
    /// Error returned by every zip invocation, after `zip_failures` run out
    pub zip_error: Option<BackupError>,
    pub dump_exit_code: i32,
    pub unreachable: bool,
    pub reject_login: bool,
    pub fail_downloads: bool,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            dirs: HashSet::new(),
            commands: Vec::new(),
            deleted: Vec::new(),
            logins: Vec::new(),
            disconnects: 0,
            last_error: None,
            du_available: true,
            dir_size: 50 * 1024 * 1024,
            free_space: 10 * 1024 * 1024 * 1024,
            engine: Some(DatabaseEngine::MySql),
            zip_failures: 0,
            zip_error: None,
            dump_exit_code: 0,
            unreachable: false,
            reject_login: false,
            fail_downloads: false,
        }
    }
}

/// In-memory remote host shared by every session opened against it
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    pub fn add_dir(&self, path: &str) {
        self.state().dirs.insert(path.to_string());
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.state().files.insert(path.to_string(), contents.to_vec());
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    /// Files currently present under a directory
    pub fn files_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut files: Vec<String> = self
            .state()
            .files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();
        files.sort();
        files
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn command_containing(&self, needle: &str) -> Option<String> {
        self.commands().into_iter().find(|c| c.contains(needle))
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn logins(&self) -> Vec<(String, SessionCredential)> {
        self.state().logins.clone()
    }
}

/// Unquote a path the way the remote shell would
fn unquote(token: &str) -> String {
    token.trim_matches('\'').replace(r"'\''", "'")
}

fn output(stdout: impl Into<String>, exit_code: i32) -> CommandOutput {
    CommandOutput::new(stdout, "", Some(exit_code))
}

fn not_found(program: &str) -> CommandOutput {
    CommandOutput::new("", format!("bash: {}: command not found", program), Some(127))
}

/// Session against a [`FakeHost`]
pub struct FakeSession {
    host: Arc<FakeHost>,
    connected: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn login(&mut self, username: &str, credential: &SessionCredential) -> BackupResult<()> {
        let mut state = self.host.state();
        if state.reject_login {
            return Err(BackupError::connection("Permission denied (publickey,password)"));
        }
        state.logins.push((username.to_string(), credential.clone()));
        self.connected = true;
        Ok(())
    }

    async fn exec(&self, command: &str) -> BackupResult<CommandOutput> {
        let mut state = self.host.state();
        state.commands.push(command.to_string());

        if let Some(path) = command.strip_prefix("du -sb ") {
            if !state.du_available {
                return Ok(not_found("du"));
            }
            return Ok(output(format!("{}\t{}\n", state.dir_size, unquote(path)), 0));
        }

        if command.starts_with("df -P -B1 ") {
            return Ok(output(
                format!(
                    "Filesystem 1-blocks Used Available Capacity Mounted on\n\
                     /dev/sda1 200000000000 1000 {} 1% /\n",
                    state.free_space
                ),
                0,
            ));
        }

        if command == "mysql --version" {
            return Ok(match state.engine {
                Some(DatabaseEngine::MySql) => {
                    output("mysql  Ver 8.0.36 for Linux on x86_64\n", 0)
                }
                _ => not_found("mysql"),
            });
        }

        if command == "psql --version" {
            return Ok(match state.engine {
                Some(DatabaseEngine::PostgreSql) => output("psql (PostgreSQL) 16.2\n", 0),
                _ => not_found("psql"),
            });
        }

        if command.contains(" zip -rq ") {
            if state.zip_failures > 0 {
                state.zip_failures -= 1;
                state.last_error = Some("zip: write error (disk I/O)".to_string());
                return Err(BackupError::connection("Remote command failed"));
            }
            if let Some(err) = state.zip_error.clone() {
                return Err(err);
            }
            let dest = command
                .split_whitespace()
                .skip_while(|t| *t != "-rq")
                .nth(1)
                .map(unquote)
                .unwrap_or_default();
            state.files.insert(dest, FAKE_ZIP_BYTES.to_vec());
            return Ok(output("", 0));
        }

        if command.contains("mysqldump") || command.contains("pg_dump") {
            if state.dump_exit_code != 0 {
                return Ok(CommandOutput::new(
                    "",
                    "mysqldump: Got error: 1045: Access denied for user",
                    Some(state.dump_exit_code),
                ));
            }
            let dest = command
                .rsplit(" > ")
                .next()
                .map(|t| unquote(t.trim()))
                .unwrap_or_default();
            state.files.insert(dest, FAKE_DUMP_BYTES.to_vec());
            return Ok(output("", 0));
        }

        let program = command.split_whitespace().next().unwrap_or_default();
        Ok(not_found(program))
    }

    async fn stat(&self, path: &str) -> Option<RemoteFileStat> {
        let state = self.host.state();
        if let Some(contents) = state.files.get(path) {
            return Some(RemoteFileStat {
                size: contents.len() as u64,
                is_dir: false,
                modified: None,
            });
        }
        state.dirs.contains(path).then_some(RemoteFileStat {
            size: 4096,
            is_dir: true,
            modified: None,
        })
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> BackupResult<()> {
        let contents = {
            let state = self.host.state();
            if state.fail_downloads {
                return Err(BackupError::connection("scp: connection reset"));
            }
            state
                .files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| BackupError::connection(format!("{}: No such file", remote_path)))?
        };
        tokio::fs::write(local_path, contents)
            .await
            .map_err(|e| BackupError::storage(e.to_string()))
    }

    async fn put(&self, remote_path: &str, contents: &[u8]) -> BackupResult<()> {
        self.host.add_file(remote_path, contents);
        Ok(())
    }

    async fn delete(&self, remote_path: &str, _recursive: bool) -> BackupResult<()> {
        let mut state = self.host.state();
        state.files.remove(remote_path);
        state.deleted.push(remote_path.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn last_error(&self) -> Option<String> {
        self.host.state().last_error.clone()
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.host.state().disconnects += 1;
    }
}

/// Connector that hands out sessions against one [`FakeHost`]
pub struct FakeConnector {
    pub host: Arc<FakeHost>,
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        _timeout: Duration,
    ) -> BackupResult<Box<dyn RemoteSession>> {
        if self.host.state().unreachable {
            return Err(BackupError::connection(format!(
                "Cannot reach {}:{}: Connection refused",
                host, port
            )));
        }
        Ok(Box::new(FakeSession {
            host: Arc::clone(&self.host),
            connected: false,
        }))
    }
}

/// Key store that always offers the same credential, or a fixed error
pub struct StaticKeyStore {
    result: BackupResult<SessionCredential>,
}

impl StaticKeyStore {
    pub fn agent() -> Self {
        Self {
            result: Ok(SessionCredential::Agent),
        }
    }

    pub fn missing_passphrase() -> Self {
        Self {
            result: Err(BackupError::config("SSH key passphrase is not configured")),
        }
    }
}

impl KeyStore for StaticKeyStore {
    fn credential(&self) -> BackupResult<SessionCredential> {
        self.result.clone()
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Failure {
        email: String,
        task_label: String,
        message: String,
    },
    Status(i64, TaskStatus),
    LogCreated(i64, i64),
    LogAppended(i64, String),
}

/// Notification sink that remembers everything it was told
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| matches!(n, Notice::Failure { .. }))
            .collect()
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Status(_, status) => Some(status),
                _ => None,
            })
            .collect()
    }

    fn push(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_failure(&self, user: &User, task_label: &str, message: &str) {
        self.push(Notice::Failure {
            email: user.email.clone(),
            task_label: task_label.to_string(),
            message: message.to_string(),
        });
    }

    fn status_changed(&self, task_id: i64, status: TaskStatus) {
        self.push(Notice::Status(task_id, status));
    }

    fn log_created(&self, task_id: i64, log_id: i64) {
        self.push(Notice::LogCreated(task_id, log_id));
    }

    fn log_appended(&self, task_id: i64, text: &str) {
        self.push(Notice::LogAppended(task_id, text.to_string()));
    }
}

/// Destination whose uploads always fail
pub struct FailingDestination;

#[async_trait]
impl StorageDestination for FailingDestination {
    async fn upload_file(&self, _local_path: &Path, key: &str) -> BackupResult<()> {
        Err(BackupError::storage(format!("503 Service Unavailable uploading {}", key)))
    }

    async fn list_files(&self, _pattern: &str) -> BackupResult<Vec<StoredObject>> {
        Ok(Vec::new())
    }

    async fn delete_file(&self, _key: &str) -> BackupResult<()> {
        Ok(())
    }
}

/// Local destination that refuses to delete one key
pub struct RefusingDeleteDestination {
    inner: LocalDestination,
    refused: String,
    attempts: Mutex<Vec<String>>,
}

impl RefusingDeleteDestination {
    pub fn new(root: &Path, refused: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalDestination::new(root, None),
            refused: refused.into(),
            attempts: Mutex::new(Vec::new()),
        })
    }

    /// Every key a delete was attempted on, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageDestination for RefusingDeleteDestination {
    async fn upload_file(&self, local_path: &Path, key: &str) -> BackupResult<()> {
        self.inner.upload_file(local_path, key).await
    }

    async fn list_files(&self, pattern: &str) -> BackupResult<Vec<StoredObject>> {
        self.inner.list_files(pattern).await
    }

    async fn delete_file(&self, key: &str) -> BackupResult<()> {
        self.attempts.lock().unwrap().push(key.to_string());
        if key == self.refused {
            return Err(BackupError::storage(format!("403 Access Denied deleting {}", key)));
        }
        self.inner.delete_file(key).await
    }
}

/// Factory that ignores the record and returns a fixed destination
pub struct FixedDestinationFactory {
    pub destination: Arc<dyn StorageDestination>,
}

#[async_trait]
impl DestinationFactory for FixedDestinationFactory {
    async fn build(
        &self,
        _destination: &BackupDestination,
    ) -> BackupResult<Arc<dyn StorageDestination>> {
        Ok(Arc::clone(&self.destination))
    }
}
