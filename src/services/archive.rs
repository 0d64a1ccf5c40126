//! Zip archive production on the remote host

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::services::probe;
use crate::services::remote_session::{CommandOutput, RemoteSession};
use crate::utils::validation::sh_quote;
use crate::utils::{BackupError, BackupResult};

/// Bounded retry for remote commands that fail intermittently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Build the zip command; every path is shell-quoted
pub fn build_zip_command(
    source_path: &str,
    dest_remote_path: &str,
    exclude_dirs: &[String],
) -> String {
    let mut command = format!(
        "cd {} && zip -rq {} .",
        sh_quote(source_path),
        sh_quote(dest_remote_path)
    );

    let excludes: Vec<String> = exclude_dirs
        .iter()
        .map(|d| d.trim().trim_matches('/'))
        .filter(|d| !d.is_empty())
        .map(|d| format!("{}/\\*", sh_quote(d)))
        .collect();

    if !excludes.is_empty() {
        command.push_str(" -x ");
        command.push_str(&excludes.join(" "));
    }

    command
}

/// Parent directory of a remote path
fn remote_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Produces zip archives of remote directories
pub struct ArchiveProducer {
    retry: RetryPolicy,
}

impl ArchiveProducer {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Archive `source_path` into `dest_remote_path`
    ///
    /// Checks free space before zipping. The check is a preflight only;
    /// other activity on the host can consume the space afterwards.
    pub async fn produce_archive(
        &self,
        session: &dyn RemoteSession,
        source_path: &str,
        dest_remote_path: &str,
        exclude_dirs: &[String],
    ) -> BackupResult<()> {
        let required = probe::directory_size(session, source_path)
            .await
            .map_err(|e| BackupError::zip(format!("Failed to measure {}: {}", source_path, e)))?
            .ok_or_else(|| {
                BackupError::zip(format!(
                    "Could not determine the size of {}",
                    source_path
                ))
            })?;

        let parent = remote_parent(dest_remote_path);
        let available = probe::available_disk_space(session, parent)
            .await
            .map_err(|e| {
                BackupError::zip(format!("Failed to check free space on {}: {}", parent, e))
            })?
            .filter(|bytes| *bytes > 0)
            .ok_or_else(|| {
                BackupError::zip(format!("Could not determine free disk space on {}", parent))
            })?;

        if available < required {
            return Err(BackupError::zip(format!(
                "Not enough disk space: {} bytes required, {} bytes available on {}",
                required, available, parent
            )));
        }

        debug!(source = source_path, required, available, "Disk space preflight passed");

        let command = build_zip_command(source_path, dest_remote_path, exclude_dirs);
        let output = self.exec_with_retry(session, &command).await?;
        if !output.success() {
            warn!(
                exit_code = ?output.exit_code,
                "zip reported a non-zero status: {}",
                output.combined()
            );
        }

        match session.stat(dest_remote_path).await {
            Some(stat) if stat.size > 0 => {
                info!(path = dest_remote_path, size = stat.size, "Archive created");
                Ok(())
            }
            Some(_) => Err(BackupError::zip(format!(
                "Archive {} is empty",
                dest_remote_path
            ))),
            None => Err(BackupError::zip(format!(
                "Archive {} was not created{}",
                dest_remote_path,
                if output.success() {
                    String::new()
                } else {
                    format!(": {}", output.combined())
                }
            ))),
        }
    }

    /// Run a command, retrying while it cannot be run at all
    ///
    /// Only retryable failures are retried; anything else is returned as is.
    async fn exec_with_retry(
        &self,
        session: &dyn RemoteSession,
        command: &str,
    ) -> BackupResult<CommandOutput> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            let err = match session.exec(command).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!(attempt, "Archive command succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }

            last_error = describe_failure(&err, session.last_error());
            warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                "Archive command failed: {}",
                last_error
            );
            if attempt < self.retry.max_attempts && !self.retry.delay.is_zero() {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        Err(BackupError::zip_command(format!(
            "Archive command failed after {} attempts: {}",
            self.retry.max_attempts, last_error
        )))
    }
}

/// The returned error, with the session's last remote error as context
fn describe_failure(err: &BackupError, session_error: Option<String>) -> String {
    match session_error {
        Some(remote) if !remote.is_empty() && !err.to_string().contains(&remote) => {
            format!("{} ({})", err, remote)
        }
        _ => err.to_string(),
    }
}
