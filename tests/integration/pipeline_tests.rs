//! Backup pipeline tests
//!
//! Full runs through the orchestrator against the fake remote host.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use vanguard::db::{ServerRepository, TaskLogRepository, TaskRepository};
use vanguard::models::{ConnectionStatus, TaskStatus};
use vanguard::services::{DatabaseEngine, SessionCredential};
use vanguard::utils::BackupError;

use crate::common::*;

fn set_mtime(path: &Path, age: Duration) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

async fn latest_log(engine: &TestEngine, task_id: i64) -> vanguard::models::BackupTaskLog {
    TaskLogRepository::new(engine.pool.clone())
        .latest_for_task(task_id)
        .await
        .unwrap()
        .expect("run log missing")
}

#[tokio::test]
async fn test_rotation_keeps_newest_copies() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .retention(2)
        .create(&engine.pool)
        .await;

    // D1 < D2 < D3
    let old = [
        (format!("backup_{}_20260101000000.zip", task.id), 3),
        (format!("backup_{}_20260102000000.zip", task.id), 2),
        (format!("backup_{}_20260103000000.zip", task.id), 1),
    ];
    for (name, days) in &old {
        let path = root.join(name);
        std::fs::write(&path, b"old").unwrap();
        set_mtime(&path, Duration::from_secs(days * 86_400));
    }

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    let artifact = outcome.artifact.clone().unwrap();
    let mut expected = vec![old[1].0.clone(), old[2].0.clone(), artifact.clone()];
    expected.sort();
    assert_eq!(file_names(&root), expected);
    assert_eq!(outcome.rotated, vec![old[0].0.clone()]);

    let stored = std::fs::read(root.join(&artifact)).unwrap();
    assert_eq!(stored, FAKE_ZIP_BYTES);
    assert_eq!(outcome.size_bytes, Some(FAKE_ZIP_BYTES.len() as u64));
}

#[tokio::test]
async fn test_rotation_is_best_effort() {
    let storage = tempfile::TempDir::new().unwrap();
    let root = storage.path().to_path_buf();

    // Task ids start at 1 in a fresh database
    let refused = "backup_1_20260102000000.zip";
    let destination = RefusingDeleteDestination::new(&root, refused);
    let engine = TestEngine::with_storage(Arc::new(FixedDestinationFactory {
        destination: destination.clone(),
    }))
    .await;

    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let record = create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &record)
        .retention(1)
        .create(&engine.pool)
        .await;
    assert_eq!(task.id, 1);

    let old = [
        ("backup_1_20260101000000.zip", 4),
        (refused, 3),
        ("backup_1_20260103000000.zip", 2),
        ("backup_1_20260104000000.zip", 1),
    ];
    for (name, days) in old {
        let path = root.join(name);
        std::fs::write(&path, b"old").unwrap();
        set_mtime(&path, Duration::from_secs(days * 86_400));
    }
    let malformed = root.join("backup_1_latest.zip");
    std::fs::write(&malformed, b"manual copy").unwrap();
    set_mtime(&malformed, Duration::from_secs(10 * 86_400));

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    // Oldest first; the refused delete does not stop the loop
    assert_eq!(
        destination.attempts(),
        vec![
            "backup_1_20260101000000.zip".to_string(),
            refused.to_string(),
            "backup_1_20260103000000.zip".to_string(),
        ]
    );
    assert_eq!(
        outcome.rotated,
        vec![
            "backup_1_20260101000000.zip".to_string(),
            "backup_1_20260103000000.zip".to_string(),
        ]
    );

    let artifact = outcome.artifact.clone().unwrap();
    let mut expected = vec![
        "backup_1_20260104000000.zip".to_string(),
        "backup_1_latest.zip".to_string(),
        refused.to_string(),
        artifact,
    ];
    expected.sort();
    assert_eq!(file_names(&root), expected);

    let log = latest_log(&engine, task.id).await;
    assert!(log.successful_at.is_some());
    assert!(log.output.contains("Removed 2 old backup(s)"));
}

#[tokio::test]
async fn test_successful_run_records_everything() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful);

    let log = latest_log(&engine, task.id).await;
    assert!(log.successful_at.is_some());
    assert!(log.finished_at.is_some());
    assert!(log.output.contains("Connected"));
    assert!(log.output.contains("Backup completed"));
    assert!(!log.output.contains("Error"));

    let logs = TaskLogRepository::new(engine.pool.clone());
    assert_eq!(logs.count_for_task(task.id).await.unwrap(), 1);
    let data = logs.list_run_data(task.id).await.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].size_bytes, Some(FAKE_ZIP_BYTES.len() as i64));

    let task = TaskRepository::new(engine.pool.clone())
        .get(task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert!(task.last_run_at.is_some());

    let server = ServerRepository::new(engine.pool.clone())
        .get(server.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.connectivity_status, ConnectionStatus::Online);
    assert!(server.last_connected_at.is_some());

    assert_eq!(
        engine.notifier.statuses(),
        vec![TaskStatus::Running, TaskStatus::Ready]
    );
    assert!(engine
        .notifier
        .notices()
        .contains(&Notice::LogCreated(task.id, log.id)));
    assert!(engine.notifier.failures().is_empty());

    // No remote or local leftovers
    assert!(engine.host.files_under("/tmp").is_empty());
    assert_eq!(engine.host.deleted(), vec![format!("/tmp/{}", outcome.artifact.unwrap())]);
    assert!(engine.scratch_files().is_empty());
    assert_eq!(engine.host.state().disconnects, 1);
}

#[tokio::test]
async fn test_archive_command_retried_until_it_runs() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.host.state().zip_failures = 2;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    let zip_runs = engine
        .host
        .commands()
        .iter()
        .filter(|c| c.contains(" zip -rq "))
        .count();
    assert_eq!(zip_runs, 3);

    let log = latest_log(&engine, task.id).await;
    assert!(log.successful_at.is_some());
    assert!(!log.output.contains("Error"));
}

#[tokio::test]
async fn test_archive_gives_up_after_max_attempts() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.host.state().zip_failures = 5;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);

    let log = latest_log(&engine, task.id).await;
    assert!(log.output.contains("Archive command failed after 3 attempts"));
    assert!(log.output.contains("zip: write error"));
    assert!(log.successful_at.is_none());
}

#[tokio::test]
async fn test_archive_does_not_retry_fatal_errors() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.host.state().zip_error = Some(BackupError::config("Session credentials revoked"));

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .starts_with("Configuration error"));

    let zip_runs = engine
        .host
        .commands()
        .iter()
        .filter(|c| c.contains(" zip -rq "))
        .count();
    assert_eq!(zip_runs, 1);
}

#[tokio::test]
async fn test_missing_du_fails_as_zip_error() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .label("Nightly site")
        .create(&engine.pool)
        .await;

    engine.host.state().du_available = false;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome.error.as_deref().unwrap().starts_with("Zip error"));

    let log = latest_log(&engine, task.id).await;
    assert!(log.output.contains("Error: Zip error"));
    assert!(log.successful_at.is_none());
    assert!(log.finished_at.is_some());

    let failures = engine.notifier.failures();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        Notice::Failure {
            email,
            task_label,
            message,
        } => {
            assert_eq!(email, "ada@example.com");
            assert_eq!(task_label, "Nightly site");
            assert!(message.contains("du"));
        }
        other => panic!("unexpected notice {:?}", other),
    }

    let task = TaskRepository::new(engine.pool.clone())
        .get(task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Ready);
    assert!(task.last_run_at.is_none());
    assert!(root.read_dir().unwrap().next().is_none());
}

#[tokio::test]
async fn test_mysql_dump_with_excluded_tables() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::database(&user, &server, &destination)
        .excluded_tables("logs,sessions")
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    let dump = engine.host.command_containing("mysqldump").unwrap();
    assert!(dump.contains("--ignore-table=mydb.logs --ignore-table=mydb.sessions"));
    assert!(dump.contains("--password=db-secret"));

    let artifact = outcome.artifact.unwrap();
    assert!(artifact.ends_with(".sql"));
    assert_eq!(std::fs::read(root.join(&artifact)).unwrap(), FAKE_DUMP_BYTES);
    assert!(engine.host.files_under("/tmp").is_empty());
}

#[tokio::test]
async fn test_postgres_dump() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::database(&user, &server, &destination)
        .excluded_tables("audit")
        .create(&engine.pool)
        .await;

    engine.host.state().engine = Some(DatabaseEngine::PostgreSql);

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    let dump = engine.host.command_containing("pg_dump").unwrap();
    assert!(dump.starts_with("PGPASSWORD=db-secret pg_dump mydb -T audit > /tmp/"));
}

#[tokio::test]
async fn test_no_database_engine() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::database(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.host.state().engine = None;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);

    let log = latest_log(&engine, task.id).await;
    assert!(log.output.contains("Database dump error"));
    assert!(engine.host.command_containing("mysqldump").is_none());
}

#[tokio::test]
async fn test_failed_dump_still_cleans_up() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::database(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.host.state().dump_exit_code = 2;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome.error.unwrap().contains("Access denied"));

    let deleted = engine.host.deleted();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].starts_with("/tmp/backup_"));
    assert!(engine.host.files_under("/tmp").is_empty());
}

#[tokio::test]
async fn test_upload_failure_removes_artifacts() {
    let engine = TestEngine::with_storage(Arc::new(FixedDestinationFactory {
        destination: Arc::new(FailingDestination),
    }))
    .await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let destination = create_local_destination(&engine.pool, &user, "/unused").await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome.error.unwrap().starts_with("Storage error"));

    assert!(engine.host.files_under("/tmp").is_empty());
    assert_eq!(engine.host.deleted().len(), 1);
    assert!(engine.scratch_files().is_empty());
    assert_eq!(engine.notifier.failures().len(), 1);
}

#[tokio::test]
async fn test_unreachable_server() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.host.state().unreachable = true;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);

    let log = latest_log(&engine, task.id).await;
    assert!(log.output.contains("Connection error: Could not connect to"));
    assert!(engine.host.commands().is_empty());
    assert!(engine.host.deleted().is_empty());
}

#[tokio::test]
async fn test_missing_passphrase_fails_before_connecting() {
    let engine = TestEngine::with_key_store(StaticKeyStore::missing_passphrase()).await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome
        .error
        .unwrap()
        .starts_with("Configuration error: SSH key passphrase"));
    assert!(engine.host.logins().is_empty());
}

#[tokio::test]
async fn test_isolated_credentials_use_password_login() {
    let engine = TestEngine::with_key_store(StaticKeyStore::missing_passphrase()).await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .isolated("site-owner", "s3cret")
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    let logins = engine.host.logins();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].0, "site-owner");
    assert!(matches!(&logins[0].1, SessionCredential::Password(p) if p == "s3cret"));
}

#[tokio::test]
async fn test_missing_source_directory() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .source("/srv/missing")
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome.error.unwrap().contains("/srv/missing does not exist"));
    assert!(engine.host.command_containing("zip").is_none());
}

#[tokio::test]
async fn test_not_enough_disk_space() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    {
        let mut state = engine.host.state();
        state.dir_size = 2_000;
        state.free_space = 1_000;
    }

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome.error.unwrap().contains("Not enough disk space"));
    assert!(engine.host.command_containing("zip").is_none());
}

#[tokio::test]
async fn test_store_path_and_suffix() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .store_path("sites/shop")
        .suffix("nightly")
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful, "run failed: {:?}", outcome.error);

    let artifact = outcome.artifact.unwrap();
    assert!(artifact.ends_with("_nightly.zip"));
    assert!(root.join("sites/shop").join(&artifact).is_file());
}

#[tokio::test]
async fn test_invalid_suffix_fails_without_connecting() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .suffix("../../etc")
        .create(&engine.pool)
        .await;

    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(!outcome.successful);
    assert!(outcome.error.unwrap().starts_with("Configuration error"));
    assert!(engine.host.logins().is_empty());
}
