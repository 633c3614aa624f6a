//! Passthrough playback: captured fragments go straight back out to an
//! output device so the record stays audible while it is monitored.

use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::error::{NeedledropError, Result};
use crate::stream::error::{ErrorReporter, StationError};
use crate::stream::fan_out::FanOut;
use crate::stream::station::{Station, StationRunner};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for audio output devices.
pub trait AudioSink: Send {
    /// Open the device. Called on the player thread.
    fn start(&mut self) -> Result<()>;

    /// Close the device.
    fn stop(&mut self) -> Result<()>;

    /// Format every written fragment must have.
    fn format(&self) -> PcmFormat;

    /// Queue a fragment for playback without blocking on the device.
    fn write(&mut self, fragment: &PcmWindow) -> Result<()>;
}

impl AudioSink for Box<dyn AudioSink> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn format(&self) -> PcmFormat {
        (**self).format()
    }

    fn write(&mut self, fragment: &PcmWindow) -> Result<()> {
        (**self).write(fragment)
    }
}

/// Station that forwards PCM fragments to an [`AudioSink`].
///
/// A sink that fails to start turns every later write into a no-op; the
/// monitor keeps running without passthrough.
pub struct PlaybackStation {
    sink: Box<dyn AudioSink>,
    started: bool,
    played: usize,
}

impl PlaybackStation {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            started: false,
            played: 0,
        }
    }

    /// Fragments handed to the device so far.
    pub fn played(&self) -> usize {
        self.played
    }
}

impl Station for PlaybackStation {
    type Input = PcmWindow;
    type Output = ();

    fn name(&self) -> &'static str {
        "Player"
    }

    fn startup(&mut self) {
        match self.sink.start() {
            Ok(()) => {
                self.started = true;
                tracing::info!("Playing through at {}", self.sink.format());
            }
            Err(e) => tracing::warn!("Passthrough disabled: {}", e),
        }
    }

    fn process(&mut self, fragment: PcmWindow) -> std::result::Result<Option<()>, StationError> {
        if !self.started {
            return Ok(None);
        }
        self.sink
            .write(&fragment)
            .map_err(|e| StationError::Recoverable(e.to_string()))?;
        self.played += 1;
        Ok(None)
    }

    fn shutdown(&mut self) {
        if self.started
            && let Err(e) = self.sink.stop()
        {
            tracing::warn!("Failed to stop output device: {}", e);
        }
    }
}

/// Runs playback on its own thread.
pub type PlayerRunner = StationRunner<PlaybackStation>;

/// Spawn `sink` playing every fragment from `pcm` until the channel
/// disconnects or `shutdown` is set.
pub fn spawn_player(
    sink: Box<dyn AudioSink>,
    pcm: Receiver<PcmWindow>,
    error_reporter: Arc<dyn ErrorReporter>,
    shutdown: Arc<AtomicBool>,
) -> PlayerRunner {
    StationRunner::spawn(
        PlaybackStation::new(sink),
        pcm,
        FanOut::new(),
        error_reporter,
        shutdown,
    )
}

/// Mock audio output for testing.
///
/// Clones share what was written, so a test can keep one clone and hand
/// the other to the player.
#[derive(Debug, Clone)]
pub struct MockAudioSink {
    format: PcmFormat,
    written: Arc<Mutex<Vec<PcmWindow>>>,
    is_started: Arc<AtomicBool>,
    should_fail_start: bool,
    should_fail_write: bool,
}

impl MockAudioSink {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            written: Arc::new(Mutex::new(Vec::new())),
            is_started: Arc::new(AtomicBool::new(false)),
            should_fail_start: false,
            should_fail_write: false,
        }
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on write.
    pub fn with_write_failure(mut self) -> Self {
        self.should_fail_write = true;
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::SeqCst)
    }

    /// Every fragment written, in order.
    pub fn written(&self) -> Vec<PcmWindow> {
        self.written
            .lock()
            .map(|written| written.clone())
            .unwrap_or_default()
    }
}

impl AudioSink for MockAudioSink {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(NeedledropError::AudioPlayback {
                message: "mock start failure".to_string(),
            });
        }
        self.is_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, fragment: &PcmWindow) -> Result<()> {
        if self.should_fail_write {
            return Err(NeedledropError::AudioPlayback {
                message: "mock write failure".to_string(),
            });
        }
        self.format.ensure_matches(&fragment.format())?;
        if let Ok(mut written) = self.written.lock() {
            written.push(fragment.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::error::CollectingReporter;

    fn format() -> PcmFormat {
        PcmFormat::new(8000, 2).unwrap()
    }

    fn fragment(level: i16) -> PcmWindow {
        PcmWindow::with_format(format(), vec![level; 160]).unwrap()
    }

    fn play(
        sink: MockAudioSink,
        fragments: Vec<PcmWindow>,
    ) -> (PlaybackStation, CollectingReporter) {
        let reporter = CollectingReporter::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let runner = spawn_player(
            Box::new(sink),
            rx,
            Arc::new(reporter.clone()),
            Arc::new(AtomicBool::new(false)),
        );
        for fragment in fragments {
            tx.send(fragment).unwrap();
        }
        drop(tx);
        (runner.join().unwrap(), reporter)
    }

    #[test]
    fn test_player_writes_fragments_in_order() {
        let sink = MockAudioSink::new(format());
        let fragments = vec![fragment(1), fragment(2), fragment(3)];

        let (station, reporter) = play(sink.clone(), fragments.clone());

        assert_eq!(sink.written(), fragments);
        assert_eq!(station.played(), 3);
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_player_stops_sink_on_disconnect() {
        let sink = MockAudioSink::new(format());
        play(sink.clone(), vec![fragment(1)]);
        assert!(!sink.is_started());
    }

    #[test]
    fn test_start_failure_disables_playback() {
        let sink = MockAudioSink::new(format()).with_start_failure();

        let (station, reporter) = play(sink.clone(), vec![fragment(1), fragment(2)]);

        assert!(sink.written().is_empty());
        assert_eq!(station.played(), 0);
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_write_failure_is_recoverable() {
        let sink = MockAudioSink::new(format()).with_write_failure();

        let (station, reporter) = play(sink, vec![fragment(1), fragment(2)]);

        assert_eq!(station.played(), 0);
        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "Player");
        assert!(reports[0].1.contains("mock write failure"));
    }

    #[test]
    fn test_mock_rejects_wrong_format() {
        let mut sink = MockAudioSink::new(format());
        let mono = PcmWindow::new(8000, 1, vec![0; 80]).unwrap();
        assert!(sink.write(&mono).is_err());
    }

    #[test]
    fn test_boxed_sink_delegates() {
        let mock = MockAudioSink::new(format());
        let mut sink: Box<dyn AudioSink> = Box::new(mock.clone());
        sink.start().unwrap();
        assert!(mock.is_started());
        assert_eq!(sink.format(), format());
        sink.write(&fragment(5)).unwrap();
        assert_eq!(mock.written().len(), 1);
    }
}
