use crate::audio::pcm::PcmFormat;
use crate::defaults;
use crate::error::{NeedledropError, Result};
use crate::stream::machine::StreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Log at debug level unless RUST_LOG says otherwise
    pub debug: bool,
    pub audio: AudioConfig,
    pub stream: StreamConfig,
    pub recognizer: RecognizerConfig,
    pub icecast: IcecastConfig,
    pub hue: HueConfig,
}

/// Audio input configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device name, or "default"
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Replay this WAV file instead of capturing from a device
    pub input: Option<PathBuf>,
    /// Play captured audio through to this output device, or "default"
    pub output_device: Option<String>,
}

/// External fingerprinting command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Program and leading arguments; the sample's WAV path is appended.
    /// Empty disables identification.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// Icecast admin endpoint for stream title updates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IcecastConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    pub admin_user: String,
    pub admin_password: String,
}

/// Philips Hue bridge and the light to drive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HueConfig {
    pub enabled: bool,
    pub host: String,
    pub username: String,
    pub light: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            input: None,
            output_device: None,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: defaults::RECOGNIZER_TIMEOUT_SECS,
        }
    }
}

impl Default for IcecastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 8000,
            mountpoint: "stream.mp3".to_string(),
            admin_user: "admin".to_string(),
            admin_password: "hackme".to_string(),
        }
    }
}

impl Default for HueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            username: "needledrop".to_string(),
            light: "Light".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - NEEDLEDROP_AUDIO_DEVICE → audio.device
    /// - NEEDLEDROP_STORE_PATH → stream.fingerprint_store_path
    /// - NEEDLEDROP_SILENCE_THRESHOLD → stream.silence_threshold
    ///
    /// Empty values are ignored, as is a threshold that is not a number.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("NEEDLEDROP_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = device;
        }

        if let Ok(path) = std::env::var("NEEDLEDROP_STORE_PATH")
            && !path.is_empty()
        {
            self.stream.fingerprint_store_path = PathBuf::from(path);
        }

        if let Ok(threshold) = std::env::var("NEEDLEDROP_SILENCE_THRESHOLD")
            && !threshold.is_empty()
        {
            match threshold.trim().parse() {
                Ok(value) => self.stream.silence_threshold = value,
                Err(_) => tracing::warn!(
                    "Ignoring NEEDLEDROP_SILENCE_THRESHOLD={:?}: not a number",
                    threshold
                ),
            }
        }

        self
    }

    /// Reject values the stream machine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be positive"));
        }
        if self.stream.sample_secs == 0 {
            return Err(invalid("stream.sample_secs", "must be positive"));
        }
        if self.stream.sample_secs > defaults::MAX_SAMPLE_SECS {
            return Err(invalid(
                "stream.sample_secs",
                &format!("must be at most {}", defaults::MAX_SAMPLE_SECS),
            ));
        }
        if self.recognizer.timeout_secs == 0 {
            return Err(invalid("recognizer.timeout_secs", "must be positive"));
        }
        Ok(())
    }

    /// Capture format from the `[audio]` section.
    pub fn format(&self) -> Result<PcmFormat> {
        PcmFormat::new(self.audio.sample_rate, self.audio.channels)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/needledrop/config.toml on Linux, or a relative
    /// `needledrop/config.toml` when no config directory is known.
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("needledrop")
            .join("config.toml")
    }

    /// Render as TOML, for `config show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NeedledropError::Other(e.to_string()))
    }
}

fn invalid(key: &str, message: &str) -> NeedledropError {
    NeedledropError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
