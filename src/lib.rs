//! needledrop - turntable monitor
//!
//! Listens to a record player, notices when a record starts and stops,
//! identifies what is playing and publishes it as stream metadata.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod app;
pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod recognize;
pub mod sinks;
pub mod store;
pub mod stream;

// Core traits (source → machine → sink)
pub use audio::player::AudioSink;
pub use audio::recorder::AudioSource;
pub use recognize::{CommandExecutor, Recognizer, SystemCommandExecutor};
pub use sinks::EventSink;
pub use store::WaveformStore;

// Audio primitives
pub use audio::{PcmFormat, PcmRingBuffer, PcmWindow};

// Stream machine
pub use stream::{Event, EventFanOut, FanOut, StreamConfig, StreamMachine, StreamState};

// Error handling
pub use error::{NeedledropError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use stream::{ErrorReporter, Station, StationError};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
