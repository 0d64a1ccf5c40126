//! Backup run orchestration
//!
//! A run moves a task `ready -> running -> ready`. In between it opens a
//! session, probes the host, produces the artifact, ships it to the
//! destination and rotates old copies. Whatever happens, the remote
//! artifact is removed, the run log is closed and the task ends `ready`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::BackupConfig;
use crate::db::{
    DbPool, DestinationRepository, ServerRepository, TaskLogRepository, TaskRepository,
    UserRepository,
};
use crate::models::{BackupTask, TaskKind, TaskStatus, TaskStatusResponse, format_file_size};
use crate::services::archive::{ArchiveProducer, RetryPolicy};
use crate::services::credentials::SecretCipher;
use crate::services::database_dump::DatabaseDumpProducer;
use crate::services::notification::NotificationSink;
use crate::services::probe;
use crate::services::remote_session::{RemoteSession, SessionFactory};
use crate::services::rotation::RetentionRotator;
use crate::services::storage::{object_key, DestinationFactory, StorageDestination};
use crate::utils::validation::validate_file_suffix;
use crate::utils::{BackupError, BackupResult};

/// Settings shared by every run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub remote_temp_dir: String,
    pub local_temp_dir: Option<PathBuf>,
    pub exclude_dirs: Vec<String>,
    pub retry: RetryPolicy,
}

impl From<&BackupConfig> for OrchestratorSettings {
    fn from(config: &BackupConfig) -> Self {
        Self {
            remote_temp_dir: config.remote_temp_dir.clone(),
            local_temp_dir: config.local_temp_dir.clone(),
            exclude_dirs: config.exclude_dirs.clone(),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&BackupConfig::default())
    }
}

/// Result of one run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub task_id: i64,
    pub log_id: Option<i64>,
    pub successful: bool,
    pub error: Option<String>,
    /// File name of the uploaded artifact
    pub artifact: Option<String>,
    pub size_bytes: Option<u64>,
    pub rotated: Vec<String>,
}

struct RunSummary {
    artifact: String,
    size_bytes: u64,
    rotated: Vec<String>,
}

/// State that outlives the pipeline so cleanup can see it
#[derive(Default)]
struct RunResources {
    session: Option<Box<dyn RemoteSession>>,
    remote_artifact: Option<String>,
}

/// Appends to the run log and mirrors each line to live observers
struct RunLog<'a> {
    logs: &'a TaskLogRepository,
    notifier: &'a dyn NotificationSink,
    task_id: i64,
    log_id: i64,
}

impl RunLog<'_> {
    async fn line(&self, text: impl AsRef<str>) {
        let text = format!("{}\n", text.as_ref());
        if let Err(e) = self.logs.append(self.log_id, &text).await {
            warn!(log_id = self.log_id, "Failed to append to run log: {:#}", e);
        }
        self.notifier.log_appended(self.task_id, &text);
    }
}

pub struct BackupOrchestrator {
    tasks: TaskRepository,
    logs: TaskLogRepository,
    servers: ServerRepository,
    destinations: DestinationRepository,
    users: UserRepository,
    sessions: Arc<SessionFactory>,
    storage: Arc<dyn DestinationFactory>,
    notifier: Arc<dyn NotificationSink>,
    cipher: SecretCipher,
    archive: ArchiveProducer,
    dump: DatabaseDumpProducer,
    settings: OrchestratorSettings,
}

impl BackupOrchestrator {
    pub fn new(
        pool: DbPool,
        sessions: Arc<SessionFactory>,
        storage: Arc<dyn DestinationFactory>,
        notifier: Arc<dyn NotificationSink>,
        cipher: SecretCipher,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            tasks: TaskRepository::new(pool.clone()),
            logs: TaskLogRepository::new(pool.clone()),
            servers: ServerRepository::new(pool.clone()),
            destinations: DestinationRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            sessions,
            storage,
            notifier,
            cipher,
            archive: ArchiveProducer::new(settings.retry),
            dump: DatabaseDumpProducer::new(),
            settings,
        }
    }

    /// Claim a task and run it in the background
    pub async fn trigger(self: &Arc<Self>, task_id: i64) -> BackupResult<TaskStatusResponse> {
        let task = self.claim(task_id).await?;
        let response = TaskStatusResponse::from(&task);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_claimed(task).await;
        });

        Ok(response)
    }

    /// Claim a task and run it to completion
    pub async fn run_now(&self, task_id: i64) -> BackupResult<RunOutcome> {
        let task = self.claim(task_id).await?;
        Ok(self.run_claimed(task).await)
    }

    /// Atomically move a task to `running`
    ///
    /// Fails with `Conflict` when the task is paused, already running, or
    /// another task on the same server is running. No log row is created.
    pub async fn claim(&self, task_id: i64) -> BackupResult<BackupTask> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("Backup task {} not found", task_id)))?;

        if self.tasks.try_claim(task_id).await? {
            return self
                .tasks
                .get(task_id)
                .await?
                .ok_or_else(|| BackupError::NotFound(format!("Backup task {} not found", task_id)));
        }

        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("Backup task {} not found", task_id)))?;

        let reason = if task.is_paused() {
            format!("Backup task {} is paused", task_id)
        } else if task.is_running() {
            format!("Backup task {} is already running", task_id)
        } else {
            format!(
                "Another backup task is already running on remote server {}",
                task.remote_server_id
            )
        };
        Err(BackupError::Conflict(reason))
    }

    /// Execute a claimed task; never fails
    pub async fn run_claimed(&self, task: BackupTask) -> RunOutcome {
        let span = info_span!("backup_run", task_id = task.id, run_id = %Uuid::new_v4());
        self.run_inner(task).instrument(span).await
    }

    async fn run_inner(&self, task: BackupTask) -> RunOutcome {
        let started = Instant::now();
        let mut outcome = RunOutcome {
            task_id: task.id,
            ..RunOutcome::default()
        };

        self.notifier.status_changed(task.id, TaskStatus::Running);
        info!(label = %task.label, kind = %task.kind, "Backup run started");

        let log = match self.logs.create(task.id).await {
            Ok(log) => log,
            Err(e) => {
                error!("Failed to create run log: {:#}", e);
                outcome.error = Some(format!("Failed to create run log: {:#}", e));
                self.finish_task(&task, false).await;
                return outcome;
            }
        };
        outcome.log_id = Some(log.id);
        self.notifier.log_created(task.id, log.id);

        let run_log = RunLog {
            logs: &self.logs,
            notifier: self.notifier.as_ref(),
            task_id: task.id,
            log_id: log.id,
        };

        let mut resources = RunResources::default();
        let result = self.execute(&task, &run_log, &mut resources).await;

        self.cleanup(&mut resources, &run_log).await;

        match result {
            Ok(summary) => {
                run_log
                    .line(format!(
                        "Backup completed: {} ({})",
                        summary.artifact,
                        format_file_size(summary.size_bytes as i64)
                    ))
                    .await;

                if let Err(e) = self.logs.mark_successful(log.id).await {
                    error!("Failed to mark run successful: {:#}", e);
                }
                let duration = started.elapsed().as_secs() as i64;
                if let Err(e) = self
                    .logs
                    .record_run_data(task.id, duration, Some(summary.size_bytes as i64))
                    .await
                {
                    warn!("Failed to record run statistics: {:#}", e);
                }

                info!(
                    artifact = %summary.artifact,
                    size = summary.size_bytes,
                    "Backup run succeeded"
                );
                outcome.successful = true;
                outcome.artifact = Some(summary.artifact);
                outcome.size_bytes = Some(summary.size_bytes);
                outcome.rotated = summary.rotated;
                self.finish_task(&task, true).await;
            }
            Err(e) => {
                warn!(kind = e.kind(), "Backup run failed: {}", e);
                run_log.line(format!("Error: {}", e)).await;

                if let Err(err) = self.logs.mark_finished(log.id).await {
                    error!("Failed to close run log: {:#}", err);
                }
                self.send_failure_notice(&task, &e).await;

                outcome.error = Some(e.to_string());
                self.finish_task(&task, false).await;
            }
        }

        outcome
    }

    /// Steps that can fail; every error ends the run
    async fn execute(
        &self,
        task: &BackupTask,
        log: &RunLog<'_>,
        resources: &mut RunResources,
    ) -> BackupResult<RunSummary> {
        // Everything that can be checked locally comes first
        let server = self
            .servers
            .get(task.remote_server_id)
            .await?
            .ok_or_else(|| {
                BackupError::config(format!(
                    "Remote server {} does not exist",
                    task.remote_server_id
                ))
            })?;
        let destination_record = self
            .destinations
            .get(task.backup_destination_id)
            .await?
            .ok_or_else(|| {
                BackupError::config(format!(
                    "Backup destination {} does not exist",
                    task.backup_destination_id
                ))
            })?;
        if let Some(suffix) = task.appended_file_name.as_deref().filter(|s| !s.is_empty()) {
            if !validate_file_suffix(suffix) {
                return Err(BackupError::config(format!("Invalid file name suffix: {}", suffix)));
            }
        }
        let destination = self.storage.build(&destination_record).await?;
        let database_password = match task.kind {
            TaskKind::Database => self
                .cipher
                .decrypt_optional(server.database_password.as_deref())?
                .unwrap_or_default(),
            TaskKind::Files => String::new(),
        };

        log.line(format!(
            "Connecting to {} ({}:{})",
            server.label, server.ip_address, server.ssh_port
        ))
        .await;

        let session = self.sessions.open(&server, Some(task)).await.map_err(|e| match e {
            BackupError::Configuration(_) => e,
            other => BackupError::connection(format!(
                "Could not connect to {} ({}): {}",
                server.label, server.ip_address, other
            )),
        })?;
        let session: &dyn RemoteSession = &**resources.session.insert(session);
        log.line("Connected").await;

        let artifact = task.artifact_file_name(Utc::now());
        let remote_path = format!(
            "{}/{}",
            self.settings.remote_temp_dir.trim_end_matches('/'),
            artifact
        );

        match task.kind {
            TaskKind::Files => {
                let source = task
                    .source_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| BackupError::config("Files task has no source path"))?;

                if !probe::path_exists(session, source).await {
                    return Err(BackupError::zip(format!(
                        "Source directory {} does not exist",
                        source
                    )));
                }
                if probe::looks_like_application_project(session, source).await {
                    log.line(format!("{} looks like an application project", source))
                        .await;
                }

                log.line(format!("Creating archive of {}", source)).await;
                resources.remote_artifact = Some(remote_path.clone());
                self.archive
                    .produce_archive(session, source, &remote_path, &self.settings.exclude_dirs)
                    .await?;
            }
            TaskKind::Database => {
                let database = task
                    .database_name
                    .as_deref()
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| BackupError::config("Database task has no database name"))?;

                let engine = probe::detect_database_engine(session).await?;
                log.line(format!("Dumping {} database {}", engine, database))
                    .await;
                resources.remote_artifact = Some(remote_path.clone());
                self.dump
                    .dump_database(
                        session,
                        engine,
                        &remote_path,
                        &database_password,
                        database,
                        task.excluded_database_tables.as_deref(),
                    )
                    .await?;
            }
        }

        log.line(format!("Uploading {} to {}", artifact, destination_record.label))
            .await;
        let size_bytes = destination
            .stream_upload(session, &remote_path, &artifact, task.store_path.as_deref())
            .await?;

        let key = object_key(task.store_path.as_deref(), &artifact);
        let rotated = self.rotate(task, destination.as_ref(), &key, log).await;

        Ok(RunSummary {
            artifact,
            size_bytes,
            rotated,
        })
    }

    /// Best-effort retention; problems are logged and never fail the run
    async fn rotate(
        &self,
        task: &BackupTask,
        destination: &dyn StorageDestination,
        current_key: &str,
        log: &RunLog<'_>,
    ) -> Vec<String> {
        if task.has_unlimited_retention() {
            return Vec::new();
        }

        match RetentionRotator::rotate_task(
            destination,
            task.store_path.as_deref(),
            task.id,
            task.retention_count,
            task.kind,
            Some(current_key),
        )
        .await
        {
            Ok(deleted) => {
                if !deleted.is_empty() {
                    log.line(format!("Removed {} old backup(s)", deleted.len()))
                        .await;
                }
                deleted
            }
            Err(e) => {
                warn!("Rotation skipped: {}", e);
                log.line(format!("Warning: rotation skipped: {}", e)).await;
                Vec::new()
            }
        }
    }

    /// Remove the remote artifact and close the session
    ///
    /// Safe to call more than once. Local copies are removed by the
    /// storage layer when the upload returns.
    async fn cleanup(&self, resources: &mut RunResources, log: &RunLog<'_>) {
        let Some(session) = resources.session.as_mut() else {
            return;
        };

        if let Some(path) = resources.remote_artifact.take() {
            match session.delete(&path, false).await {
                Ok(()) => info!(path = %path, "Removed remote artifact"),
                Err(e) => {
                    warn!(path = %path, "Failed to remove remote artifact: {}", e);
                    log.line(format!("Warning: could not remove {}: {}", path, e))
                        .await;
                }
            }
        }

        session.disconnect().await;
        resources.session = None;
    }

    async fn send_failure_notice(&self, task: &BackupTask, err: &BackupError) {
        match self.users.get(task.user_id).await {
            Ok(Some(user)) => {
                self.notifier
                    .notify_failure(&user, &task.label, &err.to_string())
                    .await
            }
            Ok(None) => warn!(user_id = task.user_id, "Task owner not found; no failure e-mail"),
            Err(e) => warn!("Failed to load task owner: {:#}", e),
        }
    }

    async fn finish_task(&self, task: &BackupTask, successful: bool) {
        if let Err(e) = self.tasks.release(task.id, successful).await {
            error!("Failed to return task to ready: {:#}", e);
        }
        self.notifier.status_changed(task.id, TaskStatus::Ready);
    }
}
