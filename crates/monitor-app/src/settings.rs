//! Layered application configuration
//!
//! Defaults, then an optional TOML file (`drowsiness.toml`, or the path in
//! `DROWSY_CONFIG`), then `DROWSY_*` environment variables with `__` between
//! nested keys (e.g. `DROWSY_DMS__ALERT_RATIO=0.4`).

use camera_capture::{CameraConfig, FileConfig};
use config::{Config, ConfigError, Environment, File, Source};
use dms::DmsConfig;
use serde::{Deserialize, Serialize};

/// Default config file stem
pub const DEFAULT_CONFIG_NAME: &str = "drowsiness";
/// Environment variable prefix
pub const ENV_PREFIX: &str = "DROWSY";

/// Which frame source to monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live camera capture
    #[default]
    Live,
    /// One pass over an uploaded video file
    Video,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: Mode,
    pub camera: CameraConfig,
    pub video: FileConfig,
    /// Live capture timer period (milliseconds)
    pub tick_interval_ms: u64,
    /// Stop live capture after this many processed frames
    pub live_frame_limit: Option<u64>,
    pub dms: DmsConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Live,
            camera: CameraConfig::default(),
            video: FileConfig::default(),
            tick_interval_ms: 10,
            live_frame_limit: None,
            dms: DmsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default file and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let name =
            std::env::var("DROWSY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_NAME.to_string());
        Self::layered(File::with_name(&name).required(false), env_source())
    }

    /// Merge a file source and an environment source over the defaults
    pub fn layered<F, E>(file: F, env: E) -> Result<Self, ConfigError>
    where
        F: Source + Send + Sync + 'static,
        E: Source + Send + Sync + 'static,
    {
        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.dms
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        if self.mode == Mode::Video && self.video.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "video mode requires video.path".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `DROWSY_*` environment variables
pub fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
