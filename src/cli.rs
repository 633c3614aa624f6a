//! Command-line interface for needledrop
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Turntable monitor: detects playback, identifies records, updates stream metadata
#[derive(Parser, Debug)]
#[command(
    name = "needledrop",
    version,
    about = "Turntable monitor: detects playback, identifies records, updates stream metadata"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: state transitions, -vv: per-fragment trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device (e.g., hw:1,0), overrides audio.device
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Play captured audio through to this output device, overrides audio.output_device
    #[arg(long, short = 'o', value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Replay a 16-bit WAV file instead of capturing from a device
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Silence threshold (peak level 0-32768), overrides stream.silence_threshold
    #[arg(long, short = 't', value_name = "LEVEL")]
    pub threshold: Option<u16>,

    /// Stop after this long. Examples: 90s, 20m, 1h30m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub stop_after: Option<Duration>,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime` plus bare numbers
/// (seconds).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration inspection actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
