//! Mindmesh configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding `auth.url`
pub const ENV_AUTH_URL: &str = "MINDMESH_AUTH_URL";

/// Environment variable overriding `auth.anon-key`
pub const ENV_AUTH_ANON_KEY: &str = "MINDMESH_AUTH_ANON_KEY";

/// Environment variable overriding `api.base-url`
pub const ENV_API_URL: &str = "MINDMESH_API_URL";

/// Errors raised when the configuration cannot drive the clients
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Identity provider URL is not set. Set {ENV_AUTH_URL} or auth.url in the config file.")]
    MissingAuthUrl,

    #[error("Identity provider public key is not set. Set {ENV_AUTH_ANON_KEY} or auth.anon-key in the config file.")]
    MissingAnonKey,

    #[error("Backend API URL is not set. Set {ENV_API_URL} or api.base-url in the config file.")]
    MissingApiUrl,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Main Mindmesh configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Identity provider configuration
    pub auth: AuthConfig,

    /// Backend REST API configuration
    pub api: ApiConfig,

    /// Session persistence and refresh
    pub session: SessionConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        debug!("validate: called");
        if self.auth.url.trim().is_empty() {
            return Err(ConfigError::MissingAuthUrl);
        }
        if self.auth.anon_key.trim().is_empty() {
            return Err(ConfigError::MissingAnonKey);
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingApiUrl);
        }
        for candidate in [&self.auth.url, &self.api.base_url, &self.auth.redirect_url] {
            url::Url::parse(candidate).map_err(|e| ConfigError::InvalidUrl {
                url: candidate.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env();
        Ok(config)
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load_file_chain(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .mindmesh.yml
        let local_config = PathBuf::from(".mindmesh.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/mindmesh/mindmesh.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("mindmesh").join("mindmesh.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Environment variables win over file values
    pub fn apply_env(&mut self) {
        debug!("apply_env: called");
        if let Ok(value) = std::env::var(ENV_AUTH_URL) {
            debug!(%value, "apply_env: auth url from environment");
            self.auth.url = value;
        }
        if let Ok(value) = std::env::var(ENV_AUTH_ANON_KEY) {
            debug!("apply_env: anon key from environment");
            self.auth.anon_key = value;
        }
        if let Ok(value) = std::env::var(ENV_API_URL) {
            debug!(%value, "apply_env: api url from environment");
            self.api.base_url = value;
        }
    }
}

/// Identity provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL of the GoTrue-compatible auth server
    pub url: String,

    /// Public (anon) key sent as the `apikey` header
    #[serde(rename = "anon-key")]
    pub anon_key: String,

    /// Where emailed links and OAuth providers send the user back
    #[serde(rename = "redirect-url")]
    pub redirect_url: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("url", &self.url)
            .field("anon_key", &if self.anon_key.is_empty() { "" } else { "<redacted>" })
            .field("redirect_url", &self.redirect_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            redirect_url: "http://localhost:3000/auth/callback".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Backend REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL; routes live under `{base-url}/api`
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Request timeout in milliseconds (AI calls can take a while)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_ms: 120_000,
        }
    }
}

/// Session persistence and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// File holding the persisted session
    #[serde(rename = "storage-path")]
    pub storage_path: PathBuf,

    /// Refresh the access token before it expires
    #[serde(rename = "auto-refresh")]
    pub auto_refresh: bool,

    /// How long before expiry the refresh fires
    #[serde(rename = "refresh-margin-secs")]
    pub refresh_margin_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let storage_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mindmesh")
            .join("session.json");

        Self {
            storage_path,
            auto_refresh: true,
            refresh_margin_secs: 60,
        }
    }
}
