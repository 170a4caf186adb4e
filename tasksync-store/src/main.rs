//! tasksync-store: serves an in-memory task book over WebSocket RPC at
//! `/rpc`. Tasks live only as long as the process.
//!
//! ```bash
//! cargo run --bin tasksync-store -- --bind 0.0.0.0:9100 --max-frame-size 131072
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tasksync_store::book::TaskBook;
use tasksync_store::config::{StoreCliArgs, StoreConfig};
use tasksync_store::server::{self, StoreState};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = StoreCliArgs::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = match StoreConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tasksync-store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state = Arc::new(StoreState::with_config(config.max_frame_size, TaskBook::new()));
    let (addr, mut handle) =
        match server::start_server_with_state(config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(addr = %config.bind_addr, error = %e, "failed to bind");
                return ExitCode::FAILURE;
            }
        };
    tracing::info!(%addr, max_frame_size = config.max_frame_size, "store listening");

    tokio::select! {
        result = &mut handle => return exit_code(result),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "cannot listen for ctrl-c, serving until killed");
                return exit_code(handle.await);
            }
        }
    }
    handle.abort();
    let tasks = state.book.lock().await.len();
    tracing::info!(tasks, "store stopped, tasks discarded");
    ExitCode::SUCCESS
}

fn exit_code(served: Result<(), tokio::task::JoinError>) -> ExitCode {
    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "store server task failed");
            ExitCode::FAILURE
        }
    }
}
