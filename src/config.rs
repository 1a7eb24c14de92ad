//! Configuration loading and persistence.
//!
//! Layering: defaults, then `<config_dir>/config.json`, then `PHX_CLIENT_*`
//! environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::Path, path::PathBuf};

use crate::constants;
use crate::transport::websocket::http_to_ws_scheme;

/// Which channel the client joins after connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// `user:{id}`, joined with the credential.
    #[default]
    User,
    /// `echo:{id}`, joined with an empty payload.
    Echo,
}

impl std::str::FromStr for Flow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "echo" => Ok(Self::Echo),
            other => anyhow::bail!("unknown flow '{other}' (expected user or echo)"),
        }
    }
}

/// Configuration for phx-client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL for REST calls.
    pub backend_url: String,
    /// Socket endpoint. Derived from `backend_url` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    /// Channel joined by `listen`.
    pub flow: Flow,
    /// Cap on frames buffered while disconnected. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffered_frames: Option<usize>,
    /// Reconnect attempts before the driver gives up.
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: constants::DEFAULT_BACKEND_URL.to_string(),
            websocket_url: None,
            flow: Flow::User,
            max_buffered_frames: None,
            reconnect_attempts: constants::DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: constants::DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `PHX_CLIENT_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("PHX_CLIENT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join(constants::CONFIG_DIR_NAME)
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the session store file.
    pub fn session_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(constants::SESSION_FILE))
    }

    /// Loads configuration from the config dir, with environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_dir()?)
    }

    /// Loads configuration from `dir`, with environment overrides.
    ///
    /// A missing file yields the defaults; an unreadable one is an error.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(constants::CONFIG_FILE);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PHX_CLIENT_BACKEND_URL") {
            self.backend_url = url;
        }

        if let Ok(url) = std::env::var("PHX_CLIENT_WEBSOCKET_URL") {
            self.websocket_url = Some(url);
        }

        if let Ok(flow) = std::env::var("PHX_CLIENT_FLOW") {
            match flow.parse() {
                Ok(flow) => self.flow = flow,
                Err(e) => log::warn!("[Config] Ignoring PHX_CLIENT_FLOW: {e}"),
            }
        }

        if let Ok(max) = std::env::var("PHX_CLIENT_MAX_BUFFERED_FRAMES") {
            if let Ok(max) = max.parse::<usize>() {
                self.max_buffered_frames = Some(max);
            }
        }
    }

    /// Socket endpoint: the explicit URL, or the backend URL with a
    /// `ws(s)` scheme and the socket path.
    pub fn websocket_url(&self) -> String {
        match &self.websocket_url {
            Some(url) => url.clone(),
            None => format!(
                "{}{}",
                http_to_ws_scheme(self.backend_url.trim_end_matches('/')),
                constants::SOCKET_PATH
            ),
        }
    }

    /// Persists the configuration to `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(constants::CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}
