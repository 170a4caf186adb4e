//! Configuration for the tasksync client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use tasksync_proto::task::{TaskPriority, TaskStatus};

use crate::sync::SyncConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The store URL is malformed or not a WebSocket URL.
    #[error("invalid store url {url:?}: {reason}")]
    InvalidStoreUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: StoreFileConfig,
    sync: SyncFileConfig,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_ms: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    text_settle_ms: Option<u64>,
    choice_settle_ms: Option<u64>,
    search_settle_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the task store. `None` runs offline against an
    /// embedded store.
    pub store_url: Option<String>,
    /// Timeout for connecting to the store.
    pub connect_timeout: Duration,
    /// Engine timing (settle delays and request timeout).
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            connect_timeout: Duration::from_secs(10),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the resolved store URL is not a `ws://` or `wss://` URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let store_url = cli
            .store_url
            .clone()
            .or_else(|| file.store.url.clone())
            .filter(|url| !url.trim().is_empty())
            .map(|url| validate_store_url(&url).map(|()| url))
            .transpose()?;

        let request_timeout = match file.store.request_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.sync.request_timeout,
        };

        Ok(Self {
            store_url,
            connect_timeout: file
                .store
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            sync: SyncConfig {
                text_settle: file
                    .sync
                    .text_settle_ms
                    .map_or(defaults.sync.text_settle, Duration::from_millis),
                choice_settle: file
                    .sync
                    .choice_settle_ms
                    .map_or(defaults.sync.choice_settle, Duration::from_millis),
                search_settle: file
                    .sync
                    .search_settle_ms
                    .map_or(defaults.sync.search_settle, Duration::from_millis),
                request_timeout,
            },
        })
    }
}

/// Checks that `raw` parses as a URL with scheme `ws` or `wss`.
fn validate_store_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidStoreUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidStoreUrl {
            url: raw.to_string(),
            reason: format!("scheme must be ws or wss, not {other}"),
        }),
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task client with optimistic sync")]
pub struct CliArgs {
    /// WebSocket URL of the task store (omit to run offline).
    #[arg(long, env = "TASKSYNC_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKSYNC_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tasksync.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What to run. Defaults to the interactive shell.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive shell driving the sync engine.
    Shell,
    /// Print the task list and exit.
    List {
        /// Only show tasks with this status (todo, done).
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Create a task and exit.
    Add {
        /// Task title.
        title: String,
        /// Priority (none, low, medium, high).
        #[arg(long, default_value = "none")]
        priority: TaskPriority,
        /// Due date as YYYY-MM-DD.
        #[arg(long)]
        due: Option<String>,
    },
    /// Delete a task and exit.
    Delete {
        /// Task id.
        id: String,
    },
}

impl Command {
    /// Whether the command keeps running and can work against an
    /// in-process store when no store is reachable.
    #[must_use]
    pub const fn is_interactive(&self) -> bool {
        matches!(self, Self::Shell)
    }

    /// The subcommand as typed on the command line.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::List { .. } => "list",
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("tasksync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
