use anyhow::{Context, Result};
use noteflow_core::Config;
use tracing::debug;

use crate::auth::AuthConfig;
use crate::cli::Cli;

/// Daemon configuration derived from noteflow.yml and CLI/env.
///
/// Only the `server` section matters to the daemon. Clients build their
/// session and REST settings from the same file through
/// [`crate::session::SessionConfig`] and [`crate::api::HttpNoteApi::from_config`].
#[derive(Debug, Clone)]
pub struct CollabConfig {
    pub listen_addr: String,
    pub auth: AuthConfig,
}

impl CollabConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let file = if cli.config.exists() {
            Config::from_file(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?
        } else {
            debug!(path = %cli.config.display(), "no config file, using defaults");
            Config::default()
        };
        Ok(Self::from_parts(cli, &file))
    }

    /// CLI values win over the file.
    pub fn from_parts(cli: &Cli, file: &Config) -> Self {
        let auth = AuthConfig {
            user_secret: cli.user_secret.clone(),
            expected_aud: cli.auth_audience.clone(),
            require_auth: cli.require_auth,
        };

        Self {
            listen_addr: cli
                .listen_addr
                .clone()
                .unwrap_or_else(|| file.server.listen_addr.clone()),
            auth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_file_values_and_cli_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  listen_addr: 127.0.0.1:9999").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["noteflow-collab", "--config", &path]).unwrap();
        let config = CollabConfig::from_cli(&cli).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9999");

        let cli = Cli::try_parse_from([
            "noteflow-collab",
            "--config",
            &path,
            "--listen-addr",
            "0.0.0.0:1",
        ])
        .unwrap();
        assert_eq!(CollabConfig::from_cli(&cli).unwrap().listen_addr, "0.0.0.0:1");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cli = Cli::try_parse_from(["noteflow-collab", "--config", "/nonexistent/noteflow.yml"])
            .unwrap();
        let config = CollabConfig::from_cli(&cli).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8787");
    }
}
