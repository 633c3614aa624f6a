//! Playback detection state machine.
//!
//! Tracks whether a record is playing from the peak level of each incoming
//! fragment, and runs identification and capture once per listening
//! episode.
//!
//! ```text
//!   Idle --loud--> Playing --quiet--> Silent --quiet for stop delay--> Idle
//!                     ^                  |
//!                     +------loud--------+
//! ```

use crate::audio::meter::peak_level;
use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::audio::ring_buffer::PcmRingBuffer;
use crate::defaults;
use crate::error::Result;
use crate::recognize::Recognizer;
use crate::store::WaveformStore;
use crate::stream::clock::{Clock, SystemClock};
use crate::stream::error::{ErrorReporter, LogReporter, StationError};
use crate::stream::event::Event;
use crate::stream::fan_out::EventFanOut;
use crate::stream::station::{Station, run_station};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

const STATION_NAME: &str = "StreamMachine";

/// What to do when the recognizer returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyFailurePolicy {
    /// Try again on a later loud fragment, no sooner than
    /// `identify_retry_secs` after the failure.
    #[default]
    Retry,
    /// Mark the episode identified and publish nothing.
    GiveUp,
}

/// Tuning for the stream machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Peak level at or below which a fragment counts as silence.
    pub silence_threshold: u16,
    /// Seconds into an episode before identification or capture may run.
    pub fingerprint_delay_secs: u32,
    /// Accepted for compatibility; the identify gate does not use it.
    pub fingerprint_identify_delay_secs: u32,
    /// Trailing seconds handed to the recognizer.
    pub fingerprint_identify_secs: u32,
    /// Trailing seconds written by capture.
    pub fingerprint_store_secs: u32,
    pub fingerprint_store_path: PathBuf,
    /// Ring buffer length in seconds.
    pub sample_secs: u32,
    /// Seconds of silence that end an episode.
    pub stop_delay_secs: u32,
    pub identify_failure: IdentifyFailurePolicy,
    pub identify_retry_secs: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            fingerprint_delay_secs: defaults::FINGERPRINT_DELAY_SECS,
            fingerprint_identify_delay_secs: defaults::FINGERPRINT_IDENTIFY_DELAY_SECS,
            fingerprint_identify_secs: defaults::FINGERPRINT_IDENTIFY_SECS,
            fingerprint_store_secs: defaults::FINGERPRINT_STORE_SECS,
            fingerprint_store_path: PathBuf::from(defaults::FINGERPRINT_STORE_PATH),
            sample_secs: defaults::SAMPLE_SECS,
            stop_delay_secs: defaults::STOP_DELAY_SECS,
            identify_failure: IdentifyFailurePolicy::default(),
            identify_retry_secs: defaults::IDENTIFY_RETRY_SECS,
        }
    }
}

impl StreamConfig {
    /// Episode age at which identification becomes eligible.
    pub fn identify_gate(&self) -> Duration {
        secs_sum(self.fingerprint_delay_secs, self.fingerprint_identify_secs)
    }

    /// Episode age at which capture becomes eligible.
    pub fn capture_gate(&self) -> Duration {
        secs_sum(self.fingerprint_delay_secs, self.fingerprint_store_secs)
    }

    pub fn stop_delay(&self) -> Duration {
        secs(self.stop_delay_secs)
    }

    pub fn identify_retry(&self) -> Duration {
        secs(self.identify_retry_secs)
    }
}

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}

// Summed in u64 so configured delays near u32::MAX cannot overflow.
fn secs_sum(a: u32, b: u32) -> Duration {
    Duration::from_secs(u64::from(a) + u64::from(b))
}

/// Current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing playing; no episode.
    Idle,
    /// Audio above the silence threshold.
    Playing,
    /// Quiet inside an episode, not yet long enough to end it.
    Silent,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Idle => write!(f, "idle"),
            StreamState::Playing => write!(f, "playing"),
            StreamState::Silent => write!(f, "silent"),
        }
    }
}

/// The stream state machine.
///
/// Owns the ring buffer and all episode state. Driven one fragment at a
/// time by [`process`](Self::process), or by [`run`](Self::run) on a
/// dedicated thread.
pub struct StreamMachine<C: Clock = SystemClock> {
    config: StreamConfig,
    buffer: PcmRingBuffer,
    state: StreamState,
    last_transition: Instant,
    episode_start: Option<Instant>,
    identification_done: bool,
    capture_done: bool,
    last_identify_failure: Option<Instant>,
    recognizer: Box<dyn Recognizer>,
    store: Box<dyn WaveformStore>,
    error_reporter: Arc<dyn ErrorReporter>,
    clock: C,
}

impl StreamMachine<SystemClock> {
    /// Creates a machine using the system clock.
    pub fn new(
        format: PcmFormat,
        config: StreamConfig,
        recognizer: Box<dyn Recognizer>,
        store: Box<dyn WaveformStore>,
    ) -> Result<Self> {
        Self::with_clock(format, config, recognizer, store, SystemClock)
    }
}

impl<C: Clock> StreamMachine<C> {
    /// Creates a machine with the given clock.
    ///
    /// Fails if `format` is unusable or `sample_secs` is zero.
    pub fn with_clock(
        format: PcmFormat,
        config: StreamConfig,
        recognizer: Box<dyn Recognizer>,
        store: Box<dyn WaveformStore>,
        clock: C,
    ) -> Result<Self> {
        let format = PcmFormat::new(format.sample_rate, format.channels)?;
        let buffer = PcmRingBuffer::with_seconds(format, config.sample_secs)?;
        let last_transition = clock.now();
        Ok(Self {
            config,
            buffer,
            state: StreamState::Idle,
            last_transition,
            episode_start: None,
            identification_done: false,
            capture_done: false,
            last_identify_failure: None,
            recognizer,
            store,
            error_reporter: Arc::new(LogReporter),
            clock,
        })
    }

    /// Route recognizer and store failures to `reporter`.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn identification_done(&self) -> bool {
        self.identification_done
    }

    pub fn capture_done(&self) -> bool {
        self.capture_done
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn format(&self) -> PcmFormat {
        self.buffer.format()
    }

    /// Read access to the rolling buffer.
    pub fn buffer(&self) -> &PcmRingBuffer {
        &self.buffer
    }

    /// Appends `fragment`, evaluates the transition table, and returns the
    /// event to publish, if any.
    ///
    /// At most one side effect (identification or capture) runs per call.
    ///
    /// # Errors
    /// `IncompatibleAudioFormat` if the fragment does not match the buffer;
    /// the machine is left untouched.
    pub fn process(&mut self, fragment: &PcmWindow) -> Result<Option<Event>> {
        self.buffer.append(fragment)?;

        let level = peak_level(fragment);
        let loud = level > self.config.silence_threshold;
        let now = self.clock.now();

        let event = match self.state {
            StreamState::Idle => {
                if loud {
                    self.transition(StreamState::Playing, now, level);
                    self.episode_start = Some(now);
                    Some(Event::StartedPlaying)
                } else {
                    None
                }
            }
            StreamState::Playing => {
                if !loud {
                    self.transition(StreamState::Silent, now, level);
                    None
                } else if self.identify_due(now) {
                    self.identify()
                } else if self.capture_due(now) {
                    self.capture();
                    None
                } else {
                    None
                }
            }
            StreamState::Silent => {
                if loud {
                    self.transition(StreamState::Playing, now, level);
                    None
                } else if now.saturating_duration_since(self.last_transition)
                    >= self.config.stop_delay()
                {
                    self.transition(StreamState::Idle, now, level);
                    self.reset_episode();
                    Some(Event::StoppedPlaying)
                } else {
                    None
                }
            }
        };

        Ok(event)
    }

    fn transition(&mut self, next: StreamState, now: Instant, level: u16) {
        tracing::debug!(from = %self.state, to = %next, level, "State transition");
        self.state = next;
        self.last_transition = now;
    }

    fn reset_episode(&mut self) {
        self.episode_start = None;
        self.identification_done = false;
        self.capture_done = false;
        self.last_identify_failure = None;
    }

    fn episode_age(&self, now: Instant) -> Duration {
        self.episode_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    fn identify_due(&self, now: Instant) -> bool {
        if self.identification_done || self.episode_age(now) < self.config.identify_gate() {
            return false;
        }
        self.last_identify_failure.is_none_or(|failed_at| {
            now.saturating_duration_since(failed_at) >= self.config.identify_retry()
        })
    }

    fn capture_due(&self, now: Instant) -> bool {
        !self.capture_done && self.episode_age(now) >= self.config.capture_gate()
    }

    fn identify(&mut self) -> Option<Event> {
        let sample = self.buffer.tail_secs(self.config.fingerprint_identify_secs);
        tracing::info!(
            "Identifying {:.1}s of audio with {}",
            sample.duration().as_secs_f64(),
            self.recognizer.name()
        );

        match self.recognizer.identify(&sample) {
            Ok(found) => {
                self.identification_done = true;
                self.last_identify_failure = None;
                let title = match found {
                    Some(identification) => identification.title,
                    None => defaults::UNKNOWN_TITLE.to_string(),
                };
                tracing::info!("Now playing: {}", title);
                Some(Event::NewMetadata { title })
            }
            Err(e) => {
                self.error_reporter.report(
                    STATION_NAME,
                    &StationError::Recoverable(format!("Identification failed: {}", e)),
                );
                match self.config.identify_failure {
                    IdentifyFailurePolicy::Retry => {
                        self.last_identify_failure = Some(self.clock.now());
                    }
                    IdentifyFailurePolicy::GiveUp => {
                        self.identification_done = true;
                    }
                }
                None
            }
        }
    }

    fn capture(&mut self) {
        self.capture_done = true;
        let sample = self.buffer.tail_secs(self.config.fingerprint_store_secs);
        if let Err(e) = self
            .store
            .store(&sample, &self.config.fingerprint_store_path)
        {
            self.error_reporter.report(
                STATION_NAME,
                &StationError::Recoverable(format!("Capture failed: {}", e)),
            );
        }
    }
}

impl<C: Clock + 'static> StreamMachine<C> {
    /// Process fragments from `fragments` until it disconnects or
    /// `shutdown` is set, publishing events through `events`.
    pub fn run(
        &mut self,
        fragments: &Receiver<PcmWindow>,
        events: &mut EventFanOut,
        shutdown: &AtomicBool,
    ) {
        let reporter = Arc::clone(&self.error_reporter);
        run_station(self, fragments, events, reporter.as_ref(), shutdown);
    }
}

impl<C: Clock + 'static> Station for StreamMachine<C> {
    type Input = PcmWindow;
    type Output = Event;

    fn process(&mut self, input: PcmWindow) -> std::result::Result<Option<Event>, StationError> {
        StreamMachine::process(self, &input)
            .map_err(|e| StationError::Recoverable(format!("Skipped fragment: {}", e)))
    }

    fn name(&self) -> &'static str {
        STATION_NAME
    }

    fn shutdown(&mut self) {
        tracing::debug!(state = %self.state, "Stream machine shutting down");
    }
}
