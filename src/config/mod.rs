//! Configuration and session storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::session::{SessionStore, StoredSession};

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";

/// Environment variable overriding `api_url`.
pub const API_URL_ENV: &str = "RIDECHAT_API_URL";

/// Pusher-protocol websocket server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub host: String,
    pub port: u16,
    /// Pusher application key
    pub app_key: String,
    /// Use `wss://` instead of `ws://`
    pub tls: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6001,
            app_key: "local".to_string(),
            tls: false,
        }
    }
}

impl RealtimeConfig {
    /// Websocket URL for the Pusher application endpoint (protocol 7).
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/app/{}?protocol=7&client=ridechat&version={}&flash=false",
            scheme,
            self.host,
            self.port,
            self.app_key,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// REST API base URL (e.g. `https://rides.example.com/api`)
    pub api_url: Option<String>,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Signed-in session, if any
    pub session: Option<StoredSession>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "ridechat", "ridechat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the bearer token)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// REST base URL: environment override, then config file, then default.
    pub fn api_url(&self) -> String {
        let url = std::env::var(API_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        url.trim_end_matches('/').to_string()
    }
}

impl SessionStore for Config {
    fn get_session(&self) -> Option<StoredSession> {
        self.session.clone()
    }

    fn set_session(&mut self, session: StoredSession) {
        self.session = Some(session);
    }

    fn clear_session(&mut self) {
        self.session = None;
    }
}
