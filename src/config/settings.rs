//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Connection settings for the live endpoint.
///
/// The model, voice, and system instruction are fixed at session open time —
/// they are configuration, not something renegotiated mid-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key.  `None` means fetch one from [`key_url`](Self::key_url).
    pub api_key: Option<String>,
    /// Local config endpoint queried for a key when `api_key` is unset.
    /// Expected to return `{ "apiKey": "…" }`.
    pub key_url: String,
    /// WebSocket endpoint of the bidirectional generation service.
    pub endpoint: String,
    /// Model identifier requested in the setup message.
    pub model: String,
    /// Prebuilt synthetic voice requested for audio responses.
    pub voice: String,
    /// System instruction sent once at session open.
    pub system_instruction: String,
    /// Maximum seconds to wait for the handshake before giving up.
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            key_url: "http://localhost:3001/api/config".into(),
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice: "Zephyr".into(),
            system_instruction:
                "You are a helpful and friendly AI assistant. Keep your responses concise and conversational."
                    .into(),
            connect_timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors from resolving required configuration before a session opens.
///
/// These abort `start()` before any device or network resource is acquired.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No API key in the settings file and the fallback endpoint had none.
    #[error("no API key configured and none available from {0}")]
    MissingKey(String),

    /// The fallback key endpoint could not be reached or parsed.
    #[error("failed to fetch API key from {url}: {reason}")]
    KeyFetch { url: String, reason: String },
}

impl ApiConfig {
    /// Resolve the API key: the configured key when present, otherwise a
    /// fetch from the local config endpoint.
    ///
    /// # Errors
    ///
    /// [`ConfigError::KeyFetch`] when the fallback request fails,
    /// [`ConfigError::MissingKey`] when neither source yields a key.
    pub async fn resolve_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.api_key.as_deref() {
            if !key.is_empty() {
                return Ok(key.to_string());
            }
        }

        log::info!("no API key in settings; fetching from {}", self.key_url);
        let response = reqwest::get(&self.key_url)
            .await
            .map_err(|e| ConfigError::KeyFetch {
                url: self.key_url.clone(),
                reason: e.to_string(),
            })?;

        let json: serde_json::Value =
            response.json().await.map_err(|e| ConfigError::KeyFetch {
                url: self.key_url.clone(),
                reason: e.to_string(),
            })?;

        match json["apiKey"].as_str() {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(ConfigError::MissingKey(self.key_url.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for the audio pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Outbound capture rate in Hz (the wire format requires 16 000).
    pub capture_rate: u32,
    /// Samples per outbound frame.
    pub frame_samples: usize,
    /// Inbound model audio rate in Hz.
    pub playback_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_rate: 16_000,
            frame_samples: 4096,
            playback_rate: 24_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_live::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Live endpoint settings.
    pub api: ApiConfig,
    /// Audio pipeline settings.
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Verify that a default `AppConfig` can be serialised to TOML and
    /// deserialised back without any data loss.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.api.api_key, loaded.api.api_key);
        assert_eq!(original.api.key_url, loaded.api.key_url);
        assert_eq!(original.api.endpoint, loaded.api.endpoint);
        assert_eq!(original.api.model, loaded.api.model);
        assert_eq!(original.api.voice, loaded.api.voice);
        assert_eq!(
            original.api.system_instruction,
            loaded.api.system_instruction
        );
        assert_eq!(
            original.api.connect_timeout_secs,
            loaded.api.connect_timeout_secs
        );
        assert_eq!(original.audio.capture_rate, loaded.audio.capture_rate);
        assert_eq!(original.audio.frame_samples, loaded.audio.frame_samples);
        assert_eq!(original.audio.playback_rate, loaded.audio.playback_rate);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.api.model, default.api.model);
        assert_eq!(config.audio.capture_rate, default.audio.capture_rate);
    }

    /// Verify default values match the live endpoint's requirements.
    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert!(cfg.api.api_key.is_none());
        assert_eq!(cfg.api.voice, "Zephyr");
        assert!(cfg.api.model.contains("native-audio"));
        assert!(cfg.api.endpoint.starts_with("wss://"));
        assert_eq!(cfg.api.connect_timeout_secs, 15);
        assert_eq!(cfg.audio.capture_rate, 16_000);
        assert_eq!(cfg.audio.frame_samples, 4096);
        assert_eq!(cfg.audio.playback_rate, 24_000);
    }

    /// Verify that modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.api.api_key = Some("test-key".into());
        cfg.api.voice = "Puck".into();
        cfg.api.connect_timeout_secs = 30;
        cfg.audio.frame_samples = 2048;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.api.api_key, Some("test-key".into()));
        assert_eq!(loaded.api.voice, "Puck");
        assert_eq!(loaded.api.connect_timeout_secs, 30);
        assert_eq!(loaded.audio.frame_samples, 2048);
    }

    /// A configured key resolves without touching the network.
    #[tokio::test]
    async fn resolve_key_prefers_configured_key() {
        let mut cfg = ApiConfig::default();
        cfg.api_key = Some("configured".into());
        assert_eq!(cfg.resolve_key().await.unwrap(), "configured");
    }

    /// An unusable fallback endpoint surfaces `KeyFetch`.
    #[tokio::test]
    async fn resolve_key_bad_endpoint_errors() {
        let mut cfg = ApiConfig::default();
        cfg.api_key = None;
        cfg.key_url = "not a url".into();
        let err = cfg.resolve_key().await.unwrap_err();
        assert!(matches!(err, ConfigError::KeyFetch { .. }));
    }

    /// An empty configured key falls through to the fetch path.
    #[tokio::test]
    async fn resolve_key_empty_key_is_not_used() {
        let mut cfg = ApiConfig::default();
        cfg.api_key = Some(String::new());
        cfg.key_url = "not a url".into();
        assert!(cfg.resolve_key().await.is_err());
    }
}
