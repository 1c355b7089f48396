//! services/guide/src/config.rs
//!
//! Defines the streaming client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The
//! `.env` file is used for local development.

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration for one streaming client instance.
///
/// Every knob is overridable per instance; `Default` carries the stock
/// values and `from_env` overlays the environment on top of them.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// The websocket endpoint of the narration backend.
    pub ws_url: String,
    /// Delay between reconnection attempts after an unclean close.
    pub reconnect_interval: Duration,
    /// Reconnection attempts before giving up permanently.
    pub max_reconnect_attempts: u32,
    /// Interval between keepalive pings while connected.
    pub ping_interval: Duration,
    /// Directory the segment store writes temporary audio files into.
    pub segment_dir: PathBuf,
    /// File the device identity adapter persists the device id in.
    pub device_id_path: PathBuf,
    pub log_level: Level,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            reconnect_interval: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            ping_interval: Duration::from_millis(30_000),
            segment_dir: std::env::temp_dir().join("guide_segments"),
            device_id_path: std::env::temp_dir().join("guide_device_id"),
            log_level: Level::INFO,
        }
    }
}

impl StreamConfig {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for
    /// development, but this is skipped in test environments to ensure
    /// tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let defaults = Self::default();

        // --- Resolve the websocket endpoint ---
        let ws_url = match std::env::var("GUIDE_WS_URL") {
            Ok(url) => url,
            Err(_) => match std::env::var("GUIDE_API_URL") {
                Ok(api_base) => derive_ws_url(&api_base),
                Err(_) => defaults.ws_url,
            },
        };

        // --- Connection timing knobs ---
        let reconnect_interval = duration_ms_var(
            "GUIDE_RECONNECT_INTERVAL_MS",
            defaults.reconnect_interval,
        )?;
        let ping_interval = duration_ms_var("GUIDE_PING_INTERVAL_MS", defaults.ping_interval)?;

        let max_reconnect_attempts = match std::env::var("GUIDE_MAX_RECONNECT_ATTEMPTS") {
            Ok(raw) => raw.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("GUIDE_MAX_RECONNECT_ATTEMPTS".to_string(), e.to_string())
            })?,
            Err(_) => defaults.max_reconnect_attempts,
        };

        // --- Local resource paths ---
        let segment_dir = std::env::var("GUIDE_SEGMENT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.segment_dir);
        let device_id_path = std::env::var("GUIDE_DEVICE_ID_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.device_id_path);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            ws_url,
            reconnect_interval,
            max_reconnect_attempts,
            ping_interval,
            segment_dir,
            device_id_path,
            log_level,
        })
    }
}

fn duration_ms_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Derives the websocket endpoint from an HTTP API base URL: the scheme is
/// swapped to its websocket counterpart, a trailing slash is trimmed, and
/// the stream path is appended.
pub fn derive_ws_url(api_base: &str) -> String {
    let swapped = if let Some(rest) = api_base.strip_prefix("https:") {
        format!("wss:{}", rest)
    } else if let Some(rest) = api_base.strip_prefix("http:") {
        format!("ws:{}", rest)
    } else {
        api_base.to_string()
    };
    let trimmed = swapped.strip_suffix('/').unwrap_or(&swapped);
    format!("{}/guide/stream", trimmed)
}

fn default_ws_url() -> String {
    derive_ws_url("https://api.example.com/api/v1")
}
