//! Configuration loading from hostwatch.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "hostwatch.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the event database.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Retention and dedup lookback window, humantime syntax ("72h", "3days").
    #[serde(default = "default_retention")]
    pub retention: String,

    /// Directory holding archived pstore crash remains.
    #[serde(default = "default_pstore_dir")]
    pub pstore_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            retention: default_retention(),
            pstore_dir: default_pstore_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn retention(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.retention).map_err(|e| ConfigError::Retention {
            value: self.retention.clone(),
            reason: e.to_string(),
        })
    }
}

fn default_database() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from(".hostwatch"))
        .join("events.db")
}

fn default_retention() -> String {
    "72h".to_string()
}

fn default_pstore_dir() -> PathBuf {
    PathBuf::from(host::DEFAULT_PSTORE_DIR)
}

fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/hostwatch"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("hostwatch"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid retention {value:?}: {reason}")]
    Retention { value: String, reason: String },
}
