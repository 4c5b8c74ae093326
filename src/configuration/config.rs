use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error_handling::types::ConfigError;
use crate::reporter::RenderStyle;
use crate::storage::{DatabaseStore, FlatFileStore};

/// Status file argument value that switches to browse mode.
pub const BROWSE_SENTINEL: &str = "!";

/// Command-line arguments.
///
/// # Command Line
/// `vpnstat <STATUS_FILE> [PRETTY]`, where `STATUS_FILE` is `!` to browse
/// stored history instead of ingesting a snapshot.
#[derive(Parser, Debug, Clone)]
#[command(name = "vpnstat")]
#[command(version)]
#[command(about = "Records VPN status snapshots as per-client history")]
pub struct Args {
    /// Path to the concentrator status file, or `!` to browse history
    pub status_file: String,

    /// Output layout: `plain` (default), `1`/`pretty`/`tree`, or `json`
    #[arg(default_value = "plain")]
    pub pretty: String,

    /// Optional TOML configuration file
    #[arg(long, env = "VPNSTAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// History backend: `sqlite`, `flatfile` or `none`
    #[arg(long, env = "VPNSTAT_BACKEND")]
    pub backend: Option<String>,

    /// SQLite database path
    #[arg(long, env = "VPNSTAT_DB_PATH")]
    pub database: Option<PathBuf>,

    /// Root directory of the flat-file history
    #[arg(long, env = "VPNSTAT_STATS_DIR")]
    pub stats_dir: Option<PathBuf>,
}

/// Storage section of the TOML configuration file.
///
/// ```toml
/// [storage]
/// backend = "flatfile"
/// stats_dir = "/var/lib/vpnstat/stats"
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub storage: FileStorageSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileStorageSection {
    pub backend: Option<String>,
    pub database_path: Option<PathBuf>,
    pub stats_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    FlatFile,
    Disabled,
}

impl StorageBackend {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "db" | "database" => Ok(StorageBackend::Sqlite),
            "flatfile" | "file" | "files" => Ok(StorageBackend::FlatFile),
            "none" | "off" | "disabled" => Ok(StorageBackend::Disabled),
            _ => Err(ConfigError::UnknownBackend(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_path: PathBuf,
    pub stats_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: PathBuf::from(DatabaseStore::DEFAULT_DB_FILE),
            stats_dir: PathBuf::from(FlatFileStore::DEFAULT_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Ingest(PathBuf),
    Browse,
}

/// Resolved runtime configuration: CLI flags over file values over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: Mode,
    pub style: RenderStyle,
    pub storage: StorageSettings,
}

impl Config {
    /// Parses the process arguments and merges the optional configuration file.
    ///
    /// # Panics / exits
    /// Like any `clap` parser, exits the process with usage on invalid arguments.
    pub fn from_args() -> Result<Self, ConfigError> {
        Self::resolve(Args::parse())
    }

    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = StorageSettings::default();
        let backend = match args.backend.or(file.storage.backend) {
            Some(name) => StorageBackend::from_name(&name)?,
            None => defaults.backend,
        };
        let storage = StorageSettings {
            backend,
            database_path: args
                .database
                .or(file.storage.database_path)
                .unwrap_or(defaults.database_path),
            stats_dir: args
                .stats_dir
                .or(file.storage.stats_dir)
                .unwrap_or(defaults.stats_dir),
        };
        let mode = if args.status_file == BROWSE_SENTINEL {
            Mode::Browse
        } else {
            Mode::Ingest(PathBuf::from(&args.status_file))
        };

        Ok(Self {
            mode,
            style: RenderStyle::from_flag(&args.pretty),
            storage,
        })
    }
}
