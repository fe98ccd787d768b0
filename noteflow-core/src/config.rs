//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Main configuration struct matching the noteflow.yml schema.
/// Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub api: ApiConfig,

    // Internal: path to config file (for diagnostics)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

/// Timing of the realtime sync session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum spacing between two pushes of local changes.
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,

    /// Quiet period after the last local edit before the session stops
    /// considering the user as actively editing.
    #[serde(default = "default_editing_idle_ms")]
    pub editing_idle_ms: u64,

    #[serde(default = "default_cursor_stale_secs")]
    pub cursor_stale_secs: u64,

    /// How often remote cursors are redrawn and aged out.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

fn default_push_interval_ms() -> u64 {
    1000
}

fn default_editing_idle_ms() -> u64 {
    5000
}

fn default_cursor_stale_secs() -> u64 {
    30
}

fn default_reconcile_interval_ms() -> u64 {
    1000
}

impl SyncConfig {
    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn editing_idle(&self) -> Duration {
        Duration::from_millis(self.editing_idle_ms)
    }

    pub fn cursor_stale(&self) -> Duration {
        Duration::from_secs(self.cursor_stale_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_interval_ms: default_push_interval_ms(),
            editing_idle_ms: default_editing_idle_ms(),
            cursor_stale_secs: default_cursor_stale_secs(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    String::from("127.0.0.1:8787")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// REST backend location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    String::from("http://localhost:5000")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid, all-defaults config.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Normalized API endpoint without a trailing slash
    pub fn api_endpoint(&self) -> &str {
        self.api.endpoint.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.sync.push_interval(), Duration::from_secs(1));
        assert_eq!(config.sync.editing_idle(), Duration::from_secs(5));
        assert_eq!(config.sync.cursor_stale(), Duration::from_secs(30));
        assert_eq!(config.server.listen_addr, "127.0.0.1:8787");
        assert_eq!(config.api_endpoint(), "http://localhost:5000");
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml("sync:\n  push_interval_ms: 250\napi:\n  endpoint: https://api.example.com/\n").unwrap();
        assert_eq!(config.sync.push_interval_ms, 250);
        assert_eq!(config.sync.editing_idle_ms, 5000);
        assert_eq!(config.api_endpoint(), "https://api.example.com");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  listen_addr: 0.0.0.0:9000").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.config_path(), Some(file.path()));
    }

    #[test]
    fn test_empty_and_invalid() {
        assert!(Config::from_yaml("").is_ok());
        assert!(matches!(
            Config::from_yaml("sync: [1, 2"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
