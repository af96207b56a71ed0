use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_DB_PATH: &str = "love-ledger.db";
pub const DEFAULT_PREFIX: &str = "/api";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Default, Parser)]
#[command(name = "love-ledger", version, about = "Love Ledger contract API server")]
pub struct Cli {
    /// Address to listen on [default: 127.0.0.1:8080]
    #[arg(long, env = "LOVE_LEDGER_BIND")]
    pub bind: Option<String>,

    /// SQLite database file [default: love-ledger.db]
    #[arg(long, env = "LOVE_LEDGER_DB", conflicts_with = "in_memory")]
    pub db: Option<PathBuf>,

    /// Keep all records in memory (nothing is persisted)
    #[arg(long, env = "LOVE_LEDGER_IN_MEMORY")]
    pub in_memory: bool,

    /// Path prefix the API is mounted under [default: /api]
    #[arg(long, env = "LOVE_LEDGER_PREFIX")]
    pub prefix: Option<String>,

    /// Bearer token clients must present; without one any bearer is accepted
    #[arg(long, env = "LOVE_LEDGER_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Log level: error, warn, info, debug or trace [default: info]
    #[arg(long, env = "LOVE_LEDGER_LOG")]
    pub log_level: Option<String>,

    /// JSON config file; command line flags and environment take precedence
    #[arg(long, env = "LOVE_LEDGER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Settings accepted in the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct FileConfig {
    pub bind: Option<String>,
    pub db_path: Option<PathBuf>,
    pub in_memory: Option<bool>,
    pub prefix: Option<String>,
    pub api_token: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// Resolved server configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Memory,
    Sqlite(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub storage: Storage,
    /// Normalized: empty for the root, otherwise `/segment[/segment...]`.
    pub prefix: String,
    pub api_token: Option<String>,
    pub log_level: LevelFilter,
}

impl ServerConfig {
    /// Merge the config file (if any) under the command line and validate.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(cli, file)
    }

    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let bind = cli
            .bind
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let storage = if let Some(db) = cli.db {
            Storage::Sqlite(db)
        } else if cli.in_memory || file.in_memory.unwrap_or(false) {
            Storage::Memory
        } else {
            Storage::Sqlite(
                file.db_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            )
        };

        let prefix = cli
            .prefix
            .or(file.prefix)
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let api_token = cli.api_token.or(file.api_token);
        let log_level = cli
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        if let Storage::Sqlite(path) = &storage {
            validate_nonempty("database path", &path.to_string_lossy())?;
        }
        if let Some(token) = &api_token {
            validate_nonempty("api token", token)?;
        }

        Ok(Self {
            bind: parse_bind(&bind)?,
            storage,
            prefix: normalize_prefix(&prefix)?,
            api_token,
            log_level: parse_log_level(&log_level)?,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

pub fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("bind address must be host:port, got {value:?}")))
}

/// `/api/` → `/api`, `/` → `` (mounted at the root).
pub fn normalize_prefix(value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if !value.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "prefix must start with '/', got {value:?}"
        )));
    }
    if value.contains("//") || value.contains(':') || value.contains('*') {
        return Err(ConfigError::Invalid(format!(
            "prefix must be a plain path, got {value:?}"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

pub fn parse_log_level(value: &str) -> Result<LevelFilter, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("unknown log level {value:?}")))
}

pub fn validate_nonempty(label: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Invalid(format!("{label} must not be blank")))
    } else {
        Ok(())
    }
}
