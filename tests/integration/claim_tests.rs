//! Task claim and concurrency tests

use vanguard::db::{TaskLogRepository, TaskRepository};
use vanguard::models::TaskStatus;
use vanguard::utils::BackupError;

use crate::common::*;

#[tokio::test]
async fn test_paused_task_never_runs() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let tasks = TaskRepository::new(engine.pool.clone());
    tasks.set_paused(task.id, true).await.unwrap();

    let err = engine.orchestrator.run_now(task.id).await.unwrap_err();
    assert!(matches!(err, BackupError::Conflict(ref m) if m.contains("paused")));

    let logs = TaskLogRepository::new(engine.pool.clone());
    assert_eq!(logs.count_for_task(task.id).await.unwrap(), 0);
    assert_eq!(
        tasks.get(task.id).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );
    assert!(engine.host.commands().is_empty());
    assert!(engine.notifier.notices().is_empty());

    // Resumed tasks run again
    tasks.set_paused(task.id, false).await.unwrap();
    let outcome = engine.orchestrator.run_now(task.id).await.unwrap();
    assert!(outcome.successful);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let engine = TestEngine::new().await;
    let err = engine.orchestrator.run_now(999).await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
}

#[tokio::test]
async fn test_running_task_cannot_be_claimed_twice() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let claimed = engine.orchestrator.claim(task.id).await.unwrap();
    assert_eq!(claimed.status, TaskStatus::Running);

    let err = engine.orchestrator.claim(task.id).await.unwrap_err();
    assert!(matches!(err, BackupError::Conflict(ref m) if m.contains("already running")));

    let outcome = engine.orchestrator.run_claimed(claimed).await;
    assert!(outcome.successful);
    assert!(engine.orchestrator.claim(task.id).await.is_ok());
}

#[tokio::test]
async fn test_one_running_task_per_server() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let first = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;
    let second = TaskBuilder::database(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let (a, b) = tokio::join!(
        engine.orchestrator.claim(first.id),
        engine.orchestrator.claim(second.id)
    );
    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|won| **won).count(),
        1,
        "exactly one claim must win"
    );

    let tasks = TaskRepository::new(engine.pool.clone());
    let running = tasks.running_on_server(server.id).await.unwrap();
    assert_eq!(running.len(), 1);

    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser.unwrap_err(),
        BackupError::Conflict(ref m) if m.contains("Another backup task")
    ));
}

#[tokio::test]
async fn test_tasks_on_different_servers_run_together() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server_a = create_server(&engine.pool).await;
    let server_b = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let first = TaskBuilder::files(&user, &server_a, &destination)
        .create(&engine.pool)
        .await;
    let second = TaskBuilder::files(&user, &server_b, &destination)
        .create(&engine.pool)
        .await;

    assert!(engine.orchestrator.claim(first.id).await.is_ok());
    assert!(engine.orchestrator.claim(second.id).await.is_ok());
}

#[tokio::test]
async fn test_each_run_creates_one_log() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    let first = engine.orchestrator.run_now(task.id).await.unwrap();
    engine.host.state().du_available = false;
    let second = engine.orchestrator.run_now(task.id).await.unwrap();

    assert!(first.successful);
    assert!(!second.successful);
    assert_ne!(first.log_id, second.log_id);

    let logs = TaskLogRepository::new(engine.pool.clone())
        .list_for_task(task.id, 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.finished_at.is_some()));
    assert_eq!(logs.iter().filter(|l| l.successful_at.is_some()).count(), 1);
}

#[tokio::test]
async fn test_reset_stale_running() {
    let engine = TestEngine::new().await;
    let user = create_user(&engine.pool).await;
    let server = create_server(&engine.pool).await;
    let root = engine.storage_root();
    let destination =
        create_local_destination(&engine.pool, &user, root.to_str().unwrap()).await;
    let task = TaskBuilder::files(&user, &server, &destination)
        .create(&engine.pool)
        .await;

    engine.orchestrator.claim(task.id).await.unwrap();

    let tasks = TaskRepository::new(engine.pool.clone());
    assert_eq!(tasks.reset_stale_running().await.unwrap(), 1);
    assert_eq!(
        tasks.get(task.id).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );
}
