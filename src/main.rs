//! Vanguard - remote backup execution engine
//!
//! Serves the trigger API, or runs a single backup task in the foreground
//! with `vanguard run <task-id>`.

use std::env;
use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

use config::LogFormat;
use vanguard::{api, config, db, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Vanguard {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let command = Command::parse(&args[1..])?;

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config)?;

    info!("Vanguard starting up");

    ensure_data_directory(&config)?;

    info!("Initializing database connection");
    let db = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::from_config(config.clone(), db)?;

    match command {
        Command::Serve => serve(state, &config).await,
        Command::Run(task_id) => run_once(state, task_id).await,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Run(i64),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        match args {
            [] => Ok(Command::Serve),
            [cmd] if cmd == "serve" => Ok(Command::Serve),
            [cmd, id] if cmd == "run" => {
                let id = id
                    .parse()
                    .with_context(|| format!("Invalid task id: {}", id))?;
                Ok(Command::Run(id))
            }
            [cmd] if cmd == "run" => bail!("Missing task id. Usage: vanguard run <task-id>"),
            other => bail!("Unknown arguments: {}. See --help", other.join(" ")),
        }
    }
}

async fn serve(state: AppState, config: &AppConfig) -> Result<()> {
    // Runs cannot survive a restart
    let reset = state
        .tasks()
        .reset_stale_running()
        .await
        .context("Failed to reset interrupted tasks")?;
    if reset > 0 {
        warn!("Returned {} interrupted task(s) to ready", reset);
    }

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("HTTP server is ready to accept connections");

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}

/// Run one task in the foreground; a failed run exits non-zero
async fn run_once(state: AppState, task_id: i64) -> Result<()> {
    let outcome = state
        .orchestrator
        .run_now(task_id)
        .await
        .with_context(|| format!("Backup task {} could not be started", task_id))?;

    if outcome.successful {
        info!(
            task_id,
            artifact = outcome.artifact.as_deref().unwrap_or_default(),
            size = outcome.size_bytes.unwrap_or_default(),
            rotated = outcome.rotated.len(),
            "Backup finished"
        );
        Ok(())
    } else {
        let message = outcome.error.unwrap_or_else(|| "unknown error".to_string());
        error!(task_id, "Backup failed: {}", message);
        bail!("Backup task {} failed: {}", task_id, message)
    }
}

fn init_logging(config: &AppConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            Ok(None)
        }
        LogTarget::File => {
            let (writer, guard) = create_file_writer(log_config)?;
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_file_logging(subscriber, &log_config.format, writer);
            Ok(Some(guard))
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config)?;
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_both_logging(subscriber, &log_config.format, writer);
            Ok(Some(guard))
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> Result<(
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let rotation = if log_config.daily_rotation {
        Rotation::DAILY
    } else {
        Rotation::NEVER
    };

    let file_appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&log_config.log_prefix)
        .filename_suffix("log")
        .max_log_files(log_config.max_log_files)
        .build(&log_config.log_dir)
        .with_context(|| format!("Failed to open log files in {:?}", log_config.log_dir))?;

    Ok(tracing_appender::non_blocking(file_appender))
}

/// Initialize console-only logging
fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
    }
}

/// Initialize file-only logging
fn init_file_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(writer))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
    }
}

/// Initialize both console and file logging
fn init_both_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true)) // Console
                .with(fmt::layer().json().with_target(true).with_writer(writer)) // File
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false)) // Console
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                ) // File
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().with_target(true)) // Console
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer),
                ) // File
                .init();
        }
    }
}

/// Ensure the data directory exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

/// Create the application router
fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .nest("/api/v1", api::routes())
        .with_state(state)
        .layer(trace_layer)
}

/// Print help message
fn print_help() {
    println!(
        r#"Vanguard {}

USAGE:
    vanguard [OPTIONS] [COMMAND]

COMMANDS:
    serve                   Serve the trigger API (default)
    run <task-id>           Run one backup task in the foreground. Exits
                            non-zero when the task is paused, busy, or the
                            run fails.

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information

ENVIRONMENT:
    VANGUARD_CONFIG             Path to configuration file
    VANGUARD_ENCRYPTION_KEY     Key for stored credentials
    VANGUARD_SSH_PASSPHRASE     Passphrase of the SSH private key
    DATABASE_URL                SQLite database URL
    RUST_LOG                    Log filter

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by VANGUARD_CONFIG environment variable
    2. ./config.yaml
    3. /etc/vanguard/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
