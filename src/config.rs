//! Publisher configuration
//!
//! Settings are read from a TOML file with three sections:
//!
//! ```toml
//! [publish]
//! url = "wss://janus.example.com/ws"
//! room = 1234
//! display = "studio"
//!
//! [connection]
//! keepalive_interval_ms = 20000
//!
//! [media]
//! hardware_acceleration = true
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{BitrateRange, MediaEngineConfig};

/// Default interval between keepalive requests (Janus expires idle sessions after 60s)
const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 20_000;

/// Default time to wait for a handshake response
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

/// Errors loading or validating settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to publish and where; fixed for one publish attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Gateway WebSocket URL
    pub url: String,
    pub room: u64,
    /// Display name shown to other participants
    pub display: String,
    /// Participant id (0 lets the gateway pick one)
    #[serde(default)]
    pub id: u32,
    /// Room PIN, if the room is protected
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

impl PublishConfig {
    pub fn new(url: impl Into<String>, room: u64, display: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room,
            display: display.into(),
            id: 0,
            pin: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_video_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::Invalid(format!(
                "gateway URL {} must start with ws:// or wss://",
                self.url
            )));
        }
        if self.room == 0 {
            return Err(ConfigError::Invalid("room must be non-zero".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "invalid video size {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Per-connection behaviour, chosen when the connection is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub keepalive_interval_ms: u64,
    /// How long `create`, `attach`, `join` and `configure` may go unanswered
    pub request_timeout_ms: u64,
    /// Feed pre-encoded video packets instead of raw frames
    pub use_encoded_media: bool,
    pub video_bitrate: BitrateRange,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            use_encoded_media: false,
            video_bitrate: BitrateRange::default(),
        }
    }
}

impl ConnectionSettings {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.video_bitrate.min_bps > self.video_bitrate.max_bps {
            return Err(ConfigError::Invalid(format!(
                "video bitrate min {} exceeds max {}",
                self.video_bitrate.min_bps, self.video_bitrate.max_bps
            )));
        }
        Ok(())
    }
}

/// Everything read from a settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub publish: Option<PublishConfig>,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub media: MediaEngineConfig,
}

impl Settings {
    /// Load and validate settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(publish) = &self.publish {
            publish.validate()?;
        }
        self.connection.validate()
    }
}
