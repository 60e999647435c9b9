//! Core configuration structures and loading logic

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// No stream key in the environment or the config file
    MissingStreamKey,
    /// A time-of-day value that is not valid HH:MM
    InvalidTime { field: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::MissingStreamKey => write!(
                f,
                "No stream key found: set the STREAM_KEY environment variable \
                 or the stream.stream_key config entry"
            ),
            ConfigError::InvalidTime { field, value } => {
                write!(f, "Invalid time for {}: {:?} (expected HH:MM)", field, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Parse a `HH:MM` time-of-day string.
pub fn parse_hhmm(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| ConfigError::InvalidTime {
        field,
        value: value.to_string(),
    })
}

/// Broadcast window configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Daily broadcast start time, HH:MM
    #[serde(default = "default_start")]
    pub start: String,
    /// Daily broadcast end time, HH:MM (may be earlier than start for
    /// windows crossing midnight; equal to start means a 24h window)
    #[serde(default = "default_end")]
    pub end: String,
}

fn default_start() -> String {
    "05:00".to_string()
}

fn default_end() -> String {
    "20:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
        }
    }
}

impl ScheduleConfig {
    pub fn start_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm("schedule.start", &self.start)
    }

    pub fn end_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm("schedule.end", &self.end)
    }
}

/// Streaming endpoint and encoder output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// RTMP ingest base URL; the stream key is appended as the last path segment
    #[serde(default = "default_rtmp_base")]
    pub rtmp_base: String,
    /// Stream key; the STREAM_KEY environment variable takes precedence
    #[serde(default)]
    pub stream_key: Option<String>,
    /// Video bitrate in kbit/s (CBR)
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate_kbps: u32,
    /// Audio bitrate in kbit/s
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
    /// Keyframe interval in frames
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,
    /// Capture framerate
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// Capture frame size, WxH
    #[serde(default = "default_video_size")]
    pub video_size: String,
    /// Optional crop filter applied before any overlay (e.g. "crop=720:720:0:60")
    #[serde(default)]
    pub crop: Option<String>,
    /// Extra output arguments appended verbatim before the output URL
    #[serde(default)]
    pub extra_output_args: Vec<String>,
}

fn default_rtmp_base() -> String {
    "rtmp://a.rtmp.youtube.com/live2".to_string()
}

fn default_video_bitrate() -> u32 {
    1200
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_keyframe_interval() -> u32 {
    60
}

fn default_framerate() -> u32 {
    30
}

fn default_video_size() -> String {
    "1280x720".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rtmp_base: default_rtmp_base(),
            stream_key: None,
            video_bitrate_kbps: default_video_bitrate(),
            audio_bitrate_kbps: default_audio_bitrate(),
            keyframe_interval: default_keyframe_interval(),
            framerate: default_framerate(),
            video_size: default_video_size(),
            crop: None,
            extra_output_args: Vec::new(),
        }
    }
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Video4Linux capture device node
    #[serde(default = "default_video_device")]
    pub video_device: String,
    /// Pixel/input format requested from the device
    #[serde(default = "default_input_format")]
    pub input_format: String,
    /// Whether to probe hardware audio sources (false streams silence)
    #[serde(default = "default_audio_enabled")]
    pub audio_enabled: bool,
}

fn default_video_device() -> String {
    "/dev/video0".to_string()
}

fn default_input_format() -> String {
    "mjpeg".to_string()
}

fn default_audio_enabled() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_device: default_video_device(),
            input_format: default_input_format(),
            audio_enabled: default_audio_enabled(),
        }
    }
}

/// Session supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Maximum duration of one encoder session before proactive rotation, seconds
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Reconnect attempts tolerated before giving up for good
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts, seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Grace period after spawn before the encoder is considered up, seconds
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,
    /// Encoder error-line ceiling; the session is abandoned once reached
    #[serde(default = "default_error_ceiling")]
    pub error_ceiling: u32,
}

fn default_max_duration_secs() -> u64 {
    28_800 // 8 hours
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    30
}

fn default_startup_grace_secs() -> u64 {
    10
}

fn default_error_ceiling() -> u32 {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            startup_grace_secs: default_startup_grace_secs(),
            error_ceiling: default_error_ceiling(),
        }
    }
}

/// Local status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusServerConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    /// Port bound on 127.0.0.1
    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_port() -> u16 {
    7879
}

impl Default for StatusServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            port: default_status_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub status_server: StatusServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - STREAM_START_TIME -> schedule.start
    /// - STREAM_END_TIME -> schedule.end
    /// - CAPTURE_VIDEO_DEVICE -> capture.video_device
    /// - SESSION_MAX_DURATION_SECS -> session.max_duration_secs
    /// - STATUS_SERVER_PORT -> status_server.port
    ///
    /// The stream key is resolved separately by [`Config::resolve_stream_key`].
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("STREAM_START_TIME") {
            if !val.is_empty() {
                self.schedule.start = val;
            }
        }

        if let Ok(val) = env::var("STREAM_END_TIME") {
            if !val.is_empty() {
                self.schedule.end = val;
            }
        }

        if let Ok(val) = env::var("CAPTURE_VIDEO_DEVICE") {
            if !val.is_empty() {
                self.capture.video_device = val;
            }
        }

        if let Ok(val) = env::var("SESSION_MAX_DURATION_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.session.max_duration_secs = secs;
            }
        }

        if let Ok(val) = env::var("STATUS_SERVER_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.status_server.port = port;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    ///
    /// Environment overrides apply either way, so a deployment driven purely
    /// by environment variables needs no config file at all.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Resolve the stream key: environment first, config file second
    ///
    /// A missing key is a fatal configuration error; no process is spawned.
    pub fn resolve_stream_key(&self) -> Result<String, ConfigError> {
        if let Ok(key) = env::var("STREAM_KEY") {
            if !key.is_empty() {
                return Ok(key);
            }
        }
        match &self.stream.stream_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(ConfigError::MissingStreamKey),
        }
    }

    /// Validate values that serde cannot reject on its own
    ///
    /// Currently checks both schedule times; called before any scheduling
    /// begins so malformed HH:MM strings fail the process up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.start_time()?;
        self.schedule.end_time()?;
        Ok(())
    }
}
