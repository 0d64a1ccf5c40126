//! Remote environment probing
//!
//! Read-only checks run before producing an artifact: sizes, free space,
//! which database client is installed, and whether a directory looks like
//! an application checkout.

use tracing::debug;

use crate::services::remote_session::RemoteSession;
use crate::utils::validation::sh_quote;
use crate::utils::{BackupError, BackupResult};

/// Marker files that identify an application project root
const PROJECT_MARKERS: &[&str] = &["artisan", "composer.json", "package.json"];

/// Shell exit status for "command not found"
const COMMAND_NOT_FOUND: i32 = 127;

/// Database engine installed on the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    MySql,
    PostgreSql,
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::MySql => write!(f, "mysql"),
            DatabaseEngine::PostgreSql => write!(f, "postgresql"),
        }
    }
}

/// Size in bytes of a remote directory, via `du -sb`
///
/// Fails with a connection error when the session is down or `du` is not
/// installed. Non-numeric output is returned as `None` so callers can
/// classify it themselves.
pub async fn directory_size(session: &dyn RemoteSession, path: &str) -> BackupResult<Option<u64>> {
    if !session.is_connected() {
        return Err(BackupError::connection("Session is not connected"));
    }

    let out = session.exec(&format!("du -sb {}", sh_quote(path))).await?;
    if command_missing(out.exit_code, &out.stderr) {
        return Err(BackupError::connection(
            "The du command is not available on the remote host",
        ));
    }

    Ok(first_number(&out.stdout))
}

/// Whether a remote path exists; false on any stat failure
pub async fn path_exists(session: &dyn RemoteSession, path: &str) -> bool {
    session.stat(path).await.is_some()
}

/// Free bytes on the filesystem containing `path`, via `df -P -B1`
///
/// `None` when the output cannot be parsed.
pub async fn available_disk_space(
    session: &dyn RemoteSession,
    path: &str,
) -> BackupResult<Option<u64>> {
    if !session.is_connected() {
        return Err(BackupError::connection("Session is not connected"));
    }

    let out = session.exec(&format!("df -P -B1 {}", sh_quote(path))).await?;
    if command_missing(out.exit_code, &out.stderr) {
        return Err(BackupError::connection(
            "The df command is not available on the remote host",
        ));
    }

    Ok(parse_df_available(&out.stdout))
}

/// Detect which database client is installed, preferring MySQL
pub async fn detect_database_engine(session: &dyn RemoteSession) -> BackupResult<DatabaseEngine> {
    for (command, engine) in [
        ("mysql --version", DatabaseEngine::MySql),
        ("psql --version", DatabaseEngine::PostgreSql),
    ] {
        match session.exec(command).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                debug!(engine = %engine, version = %out.stdout.trim(), "Detected database engine");
                return Ok(engine);
            }
            Ok(_) => {}
            Err(e) => debug!("{} could not run: {}", command, e),
        }
    }

    Err(BackupError::dump(
        "No supported database engine found on the remote host (tried mysql and psql)",
    ))
}

/// Heuristic check for a project root; a hint only, never a gate
pub async fn looks_like_application_project(session: &dyn RemoteSession, path: &str) -> bool {
    let base = path.trim_end_matches('/');
    for marker in PROJECT_MARKERS {
        if path_exists(session, &format!("{}/{}", base, marker)).await {
            return true;
        }
    }
    false
}

fn command_missing(exit_code: Option<i32>, stderr: &str) -> bool {
    exit_code == Some(COMMAND_NOT_FOUND) || stderr.to_lowercase().contains("command not found")
}

/// First whitespace-separated token parsed as an integer
fn first_number(stdout: &str) -> Option<u64> {
    stdout.split_whitespace().next()?.parse().ok()
}

/// The "Available" column of the last `df -P` data row
fn parse_df_available(stdout: &str) -> Option<u64> {
    let row = stdout.lines().skip(1).filter(|l| !l.trim().is_empty()).last()?;
    row.split_whitespace().nth(3)?.parse().ok()
}
