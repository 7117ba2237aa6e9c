//! Configuration types for the conversation session.

use crate::error::{CoachError, Result};
use crate::mode::ConversationMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Remote API endpoints and HTTP timeouts.
    pub api: ApiConfig,
    /// Credential storage keys and refresh role.
    pub auth: AuthConfig,
    /// Stream decoding settings.
    pub stream: StreamConfig,
    /// Session actor settings.
    pub session: SessionConfig,
}

/// Remote API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every endpoint path is joined onto.
    pub base_url: String,
    /// Credential verification endpoint (GET, bearer auth).
    pub verify_path: String,
    /// Credential refresh endpoint (POST, JSON body).
    pub refresh_path: String,
    /// Audio transcription endpoint (POST, multipart).
    pub transcribe_path: String,
    /// Conversation reset endpoint (POST).
    pub reset_path: String,
    /// Log entry commit endpoint (POST, JSON body).
    pub commit_log_path: String,
    /// Timeout for one-shot requests (verify, refresh, transcribe, reset, commit).
    pub request_timeout_secs: u64,
    /// TCP/TLS connect timeout, applied to streams too.
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_owned(),
            verify_path: "/auth/verify".to_owned(),
            refresh_path: "/auth/refresh".to_owned(),
            transcribe_path: "/ai/transcribe".to_owned(),
            reset_path: "/ai/conversation/close".to_owned(),
            commit_log_path: "/logs/commit".to_owned(),
            request_timeout_secs: 20,
            connect_timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    /// Parse the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if `base_url` is not an absolute URL.
    pub fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| CoachError::Config(format!("invalid base_url {:?}: {e}", self.base_url)))
    }

    /// Join an endpoint path onto the base URL, keeping any base path prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if the base URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.base()?;
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Credential storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Service name used for OS keyring entries.
    pub keyring_service: String,
    /// Store key holding the cached bearer token.
    pub token_key: String,
    /// Store key holding the stable user identifier.
    pub user_id_key: String,
    /// Role tag sent to the refresh endpoint.
    pub role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keyring_service: "com.fitcoach.app".to_owned(),
            token_key: "access_token".to_owned(),
            user_id_key: "user_id".to_owned(),
            role: "user".to_owned(),
        }
    }
}

/// Stream handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Separator inserted between successive content tokens.
    pub token_separator: String,
    /// Capacity of the channel carrying stream and completion events.
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            token_separator: " ".to_owned(),
            event_capacity: 256,
        }
    }
}

/// Session actor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the UI command channel.
    pub command_capacity: usize,
    /// Capacity of the UI notice broadcast channel.
    pub notice_capacity: usize,
    /// Mode entered when the session starts.
    pub initial_mode: ConversationMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_capacity: 32,
            notice_capacity: 64,
            initial_mode: ConversationMode::General,
        }
    }
}

impl CoachConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoachError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoachError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/fitcoach/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("fitcoach")
            .join("config.toml")
    }

    /// Check values that would otherwise fail later at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.api.base()?;
        if self.stream.event_capacity == 0 {
            return Err(CoachError::Config("stream.event_capacity must be > 0".into()));
        }
        if self.session.command_capacity == 0 {
            return Err(CoachError::Config(
                "session.command_capacity must be > 0".into(),
            ));
        }
        if self.session.notice_capacity == 0 {
            return Err(CoachError::Config(
                "session.notice_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}
