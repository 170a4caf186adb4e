//! tasksync: task client with optimistic synchronization.
//!
//! Runs an interactive shell by default, or a one-shot `list`, `add` or
//! `delete`. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/tasksync/config.toml`).
//!
//! ```bash
//! # Offline, against an in-process store
//! cargo run --bin tasksync
//!
//! # Against a running tasksync-store
//! cargo run --bin tasksync -- --store-url ws://127.0.0.1:9100/rpc
//!
//! # One-shot commands
//! cargo run --bin tasksync -- --store-url ws://127.0.0.1:9100/rpc list --json
//! cargo run --bin tasksync -- --store-url ws://127.0.0.1:9100/rpc add "Buy milk" --priority high
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::config::{CliArgs, ClientConfig, Command};
use tasksync::shell::{self, CommandError, Shell};
use tasksync::store::{EmbeddedStore, RemoteStore, StoreError, TaskStore};
use tasksync::sync::{SyncController, SyncError};
use tasksync_proto::CreateTaskRequest;
use tasksync_proto::task::TaskId;

/// Failures of a client run.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{0}` needs a store; pass --store-url or set TASKSYNC_STORE_URL")]
    Offline(&'static str),
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::Sync(SyncError::Store(err))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load configuration: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so the shell's output stays readable.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(store_url = ?config.store_url, "tasksync starting");

    let command = cli.command.clone().unwrap_or(Command::Shell);
    let result = match config.store_url.as_deref() {
        Some(url) => match RemoteStore::connect(url, config.connect_timeout).await {
            Ok(store) => run(Arc::new(store), &config, command).await,
            Err(e) if command.is_interactive() => {
                eprintln!("Could not reach store, running offline ({e})");
                run(Arc::new(EmbeddedStore::new()), &config, command).await
            }
            Err(e) => Err(e.into()),
        },
        None if command.is_interactive() => {
            run(Arc::new(EmbeddedStore::new()), &config, command).await
        }
        // An in-process store would vanish with the process.
        None => Err(CliError::Offline(command.name())),
    };

    tracing::info!("tasksync exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasksync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run<S: TaskStore>(
    store: Arc<S>,
    config: &ClientConfig,
    command: Command,
) -> Result<(), CliError> {
    let (mut controller, events) = SyncController::new(store, config.sync.clone());
    controller.refresh().await?;

    match command {
        Command::Shell => {
            Shell::new(controller, events)
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await?;
        }
        Command::List { status, json } => {
            if json {
                let tasks = shell::ordered_tasks(controller.collection(), status);
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for line in shell::render_list(&controller, status) {
                    println!("{line}");
                }
            }
        }
        Command::Add {
            title,
            priority,
            due,
        } => {
            let mut req = CreateTaskRequest::new(title, priority);
            if let Some(due) = due {
                req = req.with_due_date(shell::parse_date(&due)?);
            }
            let task = controller.create_task(req).await?;
            println!("{}", task.id);
        }
        Command::Delete { id } => {
            let id = controller
                .collection()
                .find_by_prefix(&id)
                .map_or_else(|_| TaskId::new(id.as_str()), |t| t.id.clone());
            controller.delete_task(&id).await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}
