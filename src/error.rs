//! Error types for needledrop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeedledropError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // PCM format errors
    #[error("Incompatible audio format: expected {expected}, got {actual}")]
    IncompatibleAudioFormat { expected: String, actual: String },

    #[error("Invalid audio format: {message}")]
    InvalidAudioFormat { message: String },

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Collaborator errors
    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    #[error("Storing waveform failed: {message}")]
    Storage { message: String },

    #[error("HTTP request failed: {message}")]
    Http { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NeedledropError>;
