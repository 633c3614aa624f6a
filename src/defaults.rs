//! Default configuration constants for needledrop.
//!
//! Shared by the config file types and the stream machine so both agree on
//! the same values.

/// Default capture sample rate in Hz (CD audio).
pub const SAMPLE_RATE: u32 = 44100;

/// Default capture channel count.
pub const CHANNELS: u16 = 2;

/// Peak level (absolute 16-bit sample magnitude) at or below which audio is
/// treated as silence.
///
/// A quiet turntable preamp idles at a few units of noise; 20 sits just
/// above that floor.
pub const SILENCE_THRESHOLD: u16 = 20;

/// Seconds of playback before episode actions (identify, capture) are eligible.
pub const FINGERPRINT_DELAY_SECS: u32 = 5;

/// Extra identification delay. Carried for configuration compatibility;
/// the identify gate is `FINGERPRINT_DELAY_SECS + FINGERPRINT_IDENTIFY_SECS`.
pub const FINGERPRINT_IDENTIFY_DELAY_SECS: u32 = 5;

/// Seconds of trailing audio handed to the recognizer.
pub const FINGERPRINT_IDENTIFY_SECS: u32 = 5;

/// Seconds of trailing audio written to the capture file.
pub const FINGERPRINT_STORE_SECS: u32 = 30;

/// Where the captured waveform is written.
pub const FINGERPRINT_STORE_PATH: &str = "/tmp/fingerprint.wav";

/// Seconds of audio retained in the rolling buffer.
pub const SAMPLE_SECS: u32 = 30;

/// Seconds of continuous silence before an episode ends.
pub const STOP_DELAY_SECS: u32 = 5;

/// Minimum spacing between retried identification attempts.
pub const IDENTIFY_RETRY_SECS: u32 = 5;

/// Title published when the recognizer finds no match.
pub const UNKNOWN_TITLE: &str = "Unknown Artist - Unknown Album";

/// Recognizer command timeout in seconds.
pub const RECOGNIZER_TIMEOUT_SECS: u64 = 30;

/// Fragment length produced by file sources, in milliseconds.
pub const FILE_FRAGMENT_MS: u32 = 100;

/// Hue brightness scale floor; the running peak never drops below this.
pub const HUE_MIN_PEAK: u16 = 3000;

/// Hue update interval in milliseconds.
pub const HUE_UPDATE_MS: u64 = 100;

/// Stream titles shown by the Icecast updater.
pub const IDLE_TITLE: &str = "<Idle>";
pub const STARTING_TITLE: &str = "<Starting...>";

/// Upper bound on the ring buffer length, in seconds.
pub const MAX_SAMPLE_SECS: u32 = 3600;
