//! Database dumps on the remote host
//!
//! Credentials are passed on the remote command line (`--password=` for
//! MySQL, a `PGPASSWORD=` prefix for PostgreSQL) and are therefore visible
//! in the remote process list while the dump runs. Existing remote setups
//! depend on this, so it is kept as is.

use tracing::{info, warn};

use crate::services::probe::DatabaseEngine;
use crate::services::remote_session::RemoteSession;
use crate::utils::validation::{sh_quote, split_csv, validate_identifier};
use crate::utils::{BackupError, BackupResult};

/// Build the engine-specific dump command
pub fn build_dump_command(
    engine: DatabaseEngine,
    dest_remote_path: &str,
    password: &str,
    database_name: &str,
    excluded_tables_csv: Option<&str>,
) -> BackupResult<String> {
    if !validate_identifier(database_name) {
        return Err(BackupError::dump(format!(
            "Invalid database name: {}",
            database_name
        )));
    }

    let excluded = split_csv(excluded_tables_csv.unwrap_or_default());
    if let Some(bad) = excluded.iter().find(|t| !validate_identifier(t)) {
        return Err(BackupError::dump(format!("Invalid table name: {}", bad)));
    }

    let command = match engine {
        DatabaseEngine::MySql => {
            let mut parts = vec![
                "mysqldump".to_string(),
                sh_quote(&format!("--password={}", password)),
                database_name.to_string(),
            ];
            parts.extend(
                excluded
                    .iter()
                    .map(|t| format!("--ignore-table={}.{}", database_name, t)),
            );
            format!("{} > {}", parts.join(" "), sh_quote(dest_remote_path))
        }
        DatabaseEngine::PostgreSql => {
            let mut parts = vec![
                format!("PGPASSWORD={}", sh_quote(password)),
                "pg_dump".to_string(),
                database_name.to_string(),
            ];
            for table in &excluded {
                parts.push("-T".to_string());
                parts.push(table.clone());
            }
            format!("{} > {}", parts.join(" "), sh_quote(dest_remote_path))
        }
    };

    Ok(command)
}

/// Fallback failure heuristic for transports without an exit status
fn output_signals_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("error") || lower.contains("failed")
}

/// Produces database dumps
#[derive(Debug, Default)]
pub struct DatabaseDumpProducer;

impl DatabaseDumpProducer {
    pub fn new() -> Self {
        Self
    }

    pub async fn dump_database(
        &self,
        session: &dyn RemoteSession,
        engine: DatabaseEngine,
        dest_remote_path: &str,
        password: &str,
        database_name: &str,
        excluded_tables_csv: Option<&str>,
    ) -> BackupResult<()> {
        let command = build_dump_command(
            engine,
            dest_remote_path,
            password,
            database_name,
            excluded_tables_csv,
        )?;

        let output = session.exec(&command).await.map_err(|e| {
            BackupError::dump(format!("Failed to run {} dump: {}", engine, e))
        })?;

        let failed = match output.exit_code {
            Some(code) => code != 0,
            None => output_signals_failure(&output.combined()),
        };
        if failed {
            return Err(BackupError::dump(format!(
                "{} dump of {} failed: {}",
                engine,
                database_name,
                output.combined()
            )));
        }

        if !output.stderr.trim().is_empty() {
            warn!(database = database_name, "Dump wrote to stderr: {}", output.stderr.trim());
        }

        match session.stat(dest_remote_path).await {
            Some(stat) if stat.size > 0 => {
                info!(database = database_name, size = stat.size, "Database dump created");
                Ok(())
            }
            Some(_) => Err(BackupError::dump(format!(
                "Dump file {} is empty",
                dest_remote_path
            ))),
            None => Err(BackupError::dump(format!(
                "Dump file {} was not created",
                dest_remote_path
            ))),
        }
    }
}
