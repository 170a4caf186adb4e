//! Store server settings.
//!
//! The `[server]` table of `~/.config/tasksync-store/config.toml` (or the
//! file named by `--config`) sets the listen address and the request frame
//! limit; `--bind` and `--max-frame-size` override it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Address the store listens on when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9100";

/// Default limit for one request frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Smallest frame limit accepted: an update carrying a maximal title,
/// description and tag set in four-byte characters still fits.
pub const MIN_FRAME_SIZE: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBindAddr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("max frame size {size} is below the minimum of {MIN_FRAME_SIZE} bytes")]
    FrameSizeTooSmall { size: usize },
}

/// Unvalidated `[server]` settings, as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSettings {
    bind_addr: String,
    max_frame_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    server: ServerSettings,
}

/// Command line of `tasksync-store`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "tasksync reference task store")]
pub struct StoreCliArgs {
    /// Address to listen on [default: 127.0.0.1:9100].
    #[arg(short, long, env = "TASKSYNC_STORE_ADDR")]
    pub bind: Option<String>,

    /// Settings file [default: ~/.config/tasksync-store/config.toml].
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest request frame accepted, in bytes [default: 65536].
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKSYNC_STORE_LOG")]
    pub log_level: String,
}

/// Validated server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub bind_addr: SocketAddr,
    pub max_frame_size: usize,
}

impl StoreConfig {
    /// Reads the settings file, applies command line overrides and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// An explicit `--config` that cannot be read, a file that does not
    /// parse, an unparsable bind address or a frame limit below
    /// [`MIN_FRAME_SIZE`].
    pub fn load(cli: &StoreCliArgs) -> Result<Self, ConfigError> {
        let mut settings = match &cli.config {
            Some(path) => read_settings(path)?,
            None => default_settings()?,
        };
        if let Some(bind) = &cli.bind {
            settings.bind_addr.clone_from(bind);
        }
        if let Some(size) = cli.max_frame_size {
            settings.max_frame_size = size;
        }
        Self::validate(settings)
    }

    fn validate(settings: ServerSettings) -> Result<Self, ConfigError> {
        let bind_addr =
            settings
                .bind_addr
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddr {
                    addr: settings.bind_addr.clone(),
                    source,
                })?;
        if settings.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::FrameSizeTooSmall {
                size: settings.max_frame_size,
            });
        }
        Ok(Self {
            bind_addr,
            max_frame_size: settings.max_frame_size,
        })
    }
}

fn read_settings(path: &Path) -> Result<ServerSettings, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str::<SettingsFile>(&contents)?.server)
}

/// Settings from the default location; a missing file means defaults.
fn default_settings() -> Result<ServerSettings, ConfigError> {
    match dirs::config_dir().map(|dir| dir.join("tasksync-store").join("config.toml")) {
        Some(path) if path.is_file() => read_settings(&path),
        _ => Ok(ServerSettings::default()),
    }
}
