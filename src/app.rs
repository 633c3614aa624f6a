//! Application wiring.
//!
//! Connects the pieces into one running monitor:
//! source → PCM fan-out → stream machine → event fan-out → sinks
//!
//! The PCM fan-out also feeds the passthrough player and the Hue light.

use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::audio::player::{AudioSink, PlayerRunner, spawn_player};
use crate::audio::recorder::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::config::Config;
use crate::error::Result;
use crate::recognize::{CommandRecognizer, NullRecognizer, Recognizer};
use crate::sinks::{EventSink, LogSink, SinkRunner, spawn_sink};
use crate::store::{WavFileStore, WaveformStore};
use crate::stream::error::{ErrorReporter, LogReporter};
use crate::stream::fan_out::{EventFanOut, FanOut};
use crate::stream::machine::{StreamMachine, StreamState};
use crate::stream::station::StationRunner;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(feature = "cpal-audio")]
use crate::audio::capture::CpalAudioSource;
#[cfg(feature = "cpal-audio")]
use crate::audio::output::CpalAudioSink;
#[cfg(feature = "http")]
use crate::sinks::hue::HueController;
#[cfg(feature = "http")]
use crate::sinks::icecast::IcecastSink;

/// Sleep between reads when a live source has nothing new.
const CAPTURE_POLL: Duration = Duration::from_millis(50);

/// Consecutive read failures after which capture gives up.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// PCM fragments the Hue controller may fall behind before it misses some.
#[cfg(feature = "http")]
const HUE_QUEUE: usize = 8;

/// Options that do not come from the config file.
pub struct RunOptions {
    /// Replay file input in real time. Off only makes sense in tests.
    pub paced: bool,
    pub error_reporter: Arc<dyn ErrorReporter>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            paced: true,
            error_reporter: Arc::new(LogReporter),
        }
    }
}

/// Build the monitor described by `config` and start it.
pub fn run(config: Config, options: RunOptions) -> Result<AppHandle> {
    App::from_config(config, &options)?
        .with_error_reporter(options.error_reporter)
        .start()
}

/// A monitor that has been assembled but not started.
///
/// Every collaborator can be replaced before [`start`](Self::start).
pub struct App {
    config: Config,
    source: Box<dyn AudioSource>,
    player: Option<Box<dyn AudioSink>>,
    recognizer: Box<dyn Recognizer>,
    store: Box<dyn WaveformStore>,
    sinks: Vec<Box<dyn EventSink>>,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl App {
    /// Assemble the source, recognizer, store and sinks named by `config`.
    pub fn from_config(config: Config, options: &RunOptions) -> Result<Self> {
        config.validate()?;
        let source = create_source(&config, options.paced)?;
        let player = create_player(&config, source.format())?;
        let recognizer = create_recognizer(&config)?;
        let sinks = create_sinks(&config);
        Ok(Self {
            config,
            source,
            player,
            recognizer,
            store: Box::new(WavFileStore),
            sinks,
            error_reporter: Arc::new(LogReporter),
        })
    }

    /// Assemble around an explicit source, with no recognizer, no
    /// passthrough and only the log sink.
    pub fn with_source(config: Config, source: Box<dyn AudioSource>) -> Self {
        Self {
            config,
            source,
            player: None,
            recognizer: Box::new(NullRecognizer),
            store: Box::new(WavFileStore),
            sinks: vec![Box::new(LogSink)],
            error_reporter: Arc::new(LogReporter),
        }
    }

    /// Play every captured fragment through `player`.
    pub fn with_player(mut self, player: Box<dyn AudioSink>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_store(mut self, store: Box<dyn WaveformStore>) -> Self {
        self.store = store;
        self
    }

    /// Add a sink after the configured ones.
    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Start the source and spawn every worker thread.
    ///
    /// # Errors
    /// Fails if the source cannot start or the machine rejects the source
    /// format. Nothing is left running on failure.
    pub fn start(self) -> Result<AppHandle> {
        let Self {
            config,
            mut source,
            player,
            recognizer,
            store,
            sinks,
            error_reporter,
        } = self;

        let format = source.format();
        let machine = StreamMachine::new(format, config.stream.clone(), recognizer, store)?
            .with_error_reporter(Arc::clone(&error_reporter));

        source.start()?;
        tracing::info!(
            "Listening at {} (silence threshold {})",
            format,
            config.stream.silence_threshold
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pcm: FanOut<PcmWindow> = FanOut::new();
        let mut events: EventFanOut = FanOut::new();

        let machine_rx = pcm.subscribe("stream machine");

        let sink_runners: Vec<SinkRunner> = sinks
            .into_iter()
            .map(|sink| {
                let rx = events.subscribe(sink.name());
                spawn_sink(sink, rx, Arc::clone(&error_reporter), Arc::clone(&shutdown))
            })
            .collect();

        let player = player.map(|sink| {
            let rx = pcm.subscribe("player");
            spawn_player(sink, rx, Arc::clone(&error_reporter), Arc::clone(&shutdown))
        });
        let hue = spawn_hue(&config, &mut pcm, &mut events, &shutdown);

        let machine = StationRunner::spawn(
            machine,
            machine_rx,
            events,
            Arc::clone(&error_reporter),
            Arc::clone(&shutdown),
        );

        let (done_tx, source_done) = crossbeam_channel::bounded::<()>(1);
        let capture_shutdown = Arc::clone(&shutdown);
        let capture = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let fragments = capture_loop(source.as_mut(), &mut pcm, &capture_shutdown);
                if let Err(e) = source.stop() {
                    tracing::warn!("Failed to stop audio source: {}", e);
                }
                drop(done_tx);
                fragments
            });
        let capture = match capture {
            Ok(handle) => handle,
            Err(e) => {
                shutdown.store(true, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        Ok(AppHandle {
            shutdown,
            capture: Some(capture),
            machine: Some(machine),
            sinks: sink_runners,
            player,
            hue,
            source_done,
        })
    }
}

fn create_source(config: &Config, paced: bool) -> Result<Box<dyn AudioSource>> {
    if let Some(path) = &config.audio.input {
        tracing::info!("Replaying {}", path.display());
        return Ok(Box::new(WavAudioSource::from_path(path)?.paced(paced)));
    }
    create_device_source(config)
}

#[cfg(feature = "cpal-audio")]
fn create_device_source(config: &Config) -> Result<Box<dyn AudioSource>> {
    Ok(Box::new(CpalAudioSource::new(
        &config.audio.device,
        config.format()?,
    )?))
}

#[cfg(not(feature = "cpal-audio"))]
fn create_device_source(_config: &Config) -> Result<Box<dyn AudioSource>> {
    Err(crate::error::NeedledropError::AudioCapture {
        message: "built without audio device support; use --input <wav>".to_string(),
    })
}

#[cfg(feature = "cpal-audio")]
fn create_player(config: &Config, format: PcmFormat) -> Result<Option<Box<dyn AudioSink>>> {
    let Some(device) = &config.audio.output_device else {
        return Ok(None);
    };
    tracing::info!("Passthrough to output device '{}'", device);
    Ok(Some(Box::new(CpalAudioSink::new(device, format)?)))
}

#[cfg(not(feature = "cpal-audio"))]
fn create_player(config: &Config, _format: PcmFormat) -> Result<Option<Box<dyn AudioSink>>> {
    if config.audio.output_device.is_some() {
        tracing::warn!("Passthrough is configured but this build has no audio device support");
    }
    Ok(None)
}

fn create_recognizer(config: &Config) -> Result<Box<dyn Recognizer>> {
    if config.recognizer.command.is_empty() {
        tracing::info!("No recognizer command configured; records will not be identified");
        return Ok(Box::new(NullRecognizer));
    }
    let scratch = std::env::temp_dir().join("needledrop-identify.wav");
    Ok(Box::new(CommandRecognizer::new(
        config.recognizer.command.clone(),
        scratch,
        Duration::from_secs(config.recognizer.timeout_secs),
    )?))
}

fn create_sinks(config: &Config) -> Vec<Box<dyn EventSink>> {
    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(LogSink)];

    #[cfg(feature = "http")]
    if config.icecast.enabled {
        sinks.push(Box::new(IcecastSink::new(config.icecast.clone())));
    }
    #[cfg(not(feature = "http"))]
    if config.icecast.enabled {
        tracing::warn!("Icecast is enabled but this build has no HTTP support");
    }

    sinks
}

#[cfg(feature = "http")]
fn spawn_hue(
    config: &Config,
    pcm: &mut FanOut<PcmWindow>,
    events: &mut EventFanOut,
    shutdown: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    if !config.hue.enabled {
        return None;
    }
    let pcm_rx = pcm.subscribe_bounded("hue", HUE_QUEUE);
    let event_rx = events.subscribe("hue");
    match HueController::new(config.hue.clone()).spawn(pcm_rx, event_rx, Arc::clone(shutdown)) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Failed to start Hue thread: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "http"))]
fn spawn_hue(
    config: &Config,
    _pcm: &mut FanOut<PcmWindow>,
    _events: &mut EventFanOut,
    _shutdown: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    if config.hue.enabled {
        tracing::warn!("Hue is enabled but this build has no HTTP support");
    }
    None
}

/// Read fragments from `source` and publish them until the source is
/// exhausted, fails repeatedly, or `shutdown` is set. Returns the number of
/// fragments published.
fn capture_loop(
    source: &mut dyn AudioSource,
    pcm: &mut FanOut<PcmWindow>,
    shutdown: &AtomicBool,
) -> usize {
    let finite = source.is_finite();
    let mut published = 0;
    let mut consecutive_errors = 0;

    while !shutdown.load(Ordering::SeqCst) {
        match source.read_fragment() {
            Ok(fragment) if fragment.is_empty() => {
                if finite {
                    tracing::info!("Input exhausted after {} fragments", published);
                    break;
                }
                thread::sleep(CAPTURE_POLL);
            }
            Ok(fragment) => {
                consecutive_errors = 0;
                pcm.publish(fragment);
                published += 1;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!("Audio read failed: {}", e);
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    tracing::error!(
                        "Stopping capture after {} consecutive read errors",
                        consecutive_errors
                    );
                    break;
                }
                thread::sleep(CAPTURE_POLL);
            }
        }
    }
    published
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Fragments read from the source.
    pub fragments: usize,
    /// Machine state when it stopped, if its thread exited cleanly.
    pub final_state: Option<StreamState>,
    /// Events each sink handled successfully, by sink name.
    pub handled: Vec<(&'static str, usize)>,
    /// Fragments sent to the passthrough device, if one was configured.
    pub played: Option<usize>,
}

/// Handle to a running monitor.
pub struct AppHandle {
    shutdown: Arc<AtomicBool>,
    capture: Option<JoinHandle<usize>>,
    machine: Option<StationRunner<StreamMachine>>,
    sinks: Vec<SinkRunner>,
    player: Option<PlayerRunner>,
    hue: Option<JoinHandle<()>>,
    source_done: Receiver<()>,
}

impl AppHandle {
    /// Receiver that disconnects once capture has ended.
    pub fn source_done(&self) -> Receiver<()> {
        self.source_done.clone()
    }

    /// Block until capture ends: a finite source is exhausted, the device
    /// failed, or the monitor was stopped.
    pub fn wait_source_done(&self) {
        self.source_done.recv().ok();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop immediately. Queued fragments and events are discarded.
    pub fn stop(self) -> RunSummary {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join()
    }

    /// Wait for every thread to exit.
    ///
    /// After the source is done the pipeline drains on its own: the machine
    /// finishes queued fragments, then each sink its queued events.
    pub fn join(mut self) -> RunSummary {
        let fragments = match self.capture.take().map(JoinHandle::join) {
            Some(Ok(fragments)) => fragments,
            Some(Err(_)) => {
                tracing::error!("Capture thread panicked");
                0
            }
            None => 0,
        };

        let final_state = self.machine.take().and_then(|runner| match runner.join() {
            Ok(machine) => Some(machine.state()),
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        });

        let handled = self
            .sinks
            .drain(..)
            .filter_map(|runner| {
                let name = runner.name();
                match runner.join() {
                    Ok(station) => Some((name, station.handled())),
                    Err(e) => {
                        tracing::error!("{}", e);
                        None
                    }
                }
            })
            .collect();

        let played = self.player.take().and_then(|runner| match runner.join() {
            Ok(station) => Some(station.played()),
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        });

        if let Some(hue) = self.hue.take() {
            // The Hue thread only exits on shutdown or when PCM disconnects.
            if hue.join().is_err() {
                tracing::error!("Hue thread panicked");
            }
        }

        RunSummary {
            fragments,
            final_state,
            handled,
            played,
        }
    }
}

impl Drop for AppHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::MockAudioSink;
    use crate::audio::recorder::MockAudioSource;
    use crate::recognize::MockRecognizer;
    use crate::store::MockWaveformStore;
    use crate::stream::error::CollectingReporter;
    use crate::stream::event::Event;
    use std::sync::Mutex;

    fn format() -> PcmFormat {
        PcmFormat::new(100, 1).unwrap()
    }

    fn fragment(level: i16) -> PcmWindow {
        PcmWindow::with_format(format(), vec![level; 100]).unwrap()
    }

    /// Zero delays so every step happens on the next fragment.
    fn instant_config() -> Config {
        let mut config = Config::default();
        config.stream.fingerprint_delay_secs = 0;
        config.stream.fingerprint_identify_secs = 0;
        config.stream.fingerprint_store_secs = 0;
        config.stream.stop_delay_secs = 0;
        config.stream.sample_secs = 2;
        config
    }

    struct RecordingSink(Arc<Mutex<Vec<Event>>>);

    impl EventSink for RecordingSink {
        fn handle(&mut self, event: &Event) -> Result<()> {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(event.clone());
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Recording"
        }
    }

    #[test]
    fn test_finite_source_runs_full_episode() {
        let source = MockAudioSource::new(format()).with_fragments(vec![
            fragment(0),
            fragment(5000),
            fragment(5000),
            fragment(5000),
            fragment(0),
            fragment(0),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = MockWaveformStore::new();

        let handle = App::with_source(instant_config(), Box::new(source))
            .with_recognizer(Box::new(MockRecognizer::new().with_response("Can - Vitamin C")))
            .with_store(Box::new(store.clone()))
            .with_sink(Box::new(RecordingSink(seen.clone())))
            .start()
            .unwrap();

        handle.wait_source_done();
        let summary = handle.join();

        assert_eq!(summary.fragments, 6);
        assert_eq!(summary.final_state, Some(StreamState::Idle));
        assert_eq!(summary.handled, vec![("LogSink", 3), ("Recording", 3)]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Event::StartedPlaying,
                Event::NewMetadata {
                    title: "Can - Vitamin C".to_string()
                },
                Event::StoppedPlaying,
            ]
        );
        assert_eq!(store.calls(), 1);
        assert_eq!(summary.played, None);
    }

    #[test]
    fn test_player_hears_every_fragment() {
        let fragments = vec![fragment(0), fragment(5000), fragment(5000), fragment(0)];
        let source = MockAudioSource::new(format()).with_fragments(fragments.clone());
        let player = MockAudioSink::new(format());

        let handle = App::with_source(instant_config(), Box::new(source))
            .with_player(Box::new(player.clone()))
            .with_store(Box::new(MockWaveformStore::new()))
            .start()
            .unwrap();
        handle.wait_source_done();
        let summary = handle.join();

        assert_eq!(summary.played, Some(4));
        assert_eq!(player.written(), fragments);
        assert!(!player.is_started());
    }

    #[test]
    fn test_failing_player_does_not_stop_monitor() {
        let source = MockAudioSource::new(format())
            .with_fragments(vec![fragment(5000), fragment(5000)]);
        let reporter = CollectingReporter::new();

        let handle = App::with_source(instant_config(), Box::new(source))
            .with_player(Box::new(MockAudioSink::new(format()).with_write_failure()))
            .with_store(Box::new(MockWaveformStore::new()))
            .with_error_reporter(Arc::new(reporter.clone()))
            .start()
            .unwrap();
        handle.wait_source_done();
        let summary = handle.join();

        assert_eq!(summary.fragments, 2);
        assert_eq!(summary.played, Some(0));
        assert_eq!(summary.final_state, Some(StreamState::Playing));
        assert!(reporter.reports().iter().all(|(station, _)| station == "Player"));
        assert_eq!(reporter.reports().len(), 2);
    }

    #[test]
    fn test_no_output_device_means_no_player() {
        let config = Config::default();
        assert!(create_player(&config, format()).unwrap().is_none());
    }

    #[test]
    fn test_start_failure_is_reported() {
        let source = MockAudioSource::new(format()).with_start_failure();
        let result = App::with_source(instant_config(), Box::new(source)).start();
        assert!(result.is_err());
    }

    #[test]
    fn test_read_errors_stop_capture() {
        let source = MockAudioSource::new(format()).with_read_failure();
        let reporter = CollectingReporter::new();
        let handle = App::with_source(instant_config(), Box::new(source))
            .with_error_reporter(Arc::new(reporter.clone()))
            .start()
            .unwrap();

        handle.wait_source_done();
        let summary = handle.join();
        assert_eq!(summary.fragments, 0);
        assert_eq!(summary.final_state, Some(StreamState::Idle));
    }

    #[test]
    fn test_mismatched_fragment_is_reported_and_skipped() {
        let stereo = PcmWindow::new(100, 2, vec![9000; 200]).unwrap();
        let source = MockAudioSource::new(format()).with_fragments(vec![stereo, fragment(5000)]);
        let reporter = CollectingReporter::new();

        let handle = App::with_source(instant_config(), Box::new(source))
            .with_error_reporter(Arc::new(reporter.clone()))
            .start()
            .unwrap();
        handle.wait_source_done();
        let summary = handle.join();

        assert_eq!(summary.final_state, Some(StreamState::Playing));
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "StreamMachine");
    }

    #[test]
    fn test_stop_sets_shutdown() {
        let source = MockAudioSource::new(format());
        let handle = App::with_source(instant_config(), Box::new(source))
            .start()
            .unwrap();
        assert!(handle.is_running());
        let summary = handle.stop();
        assert_eq!(summary.fragments, 0);
    }

    #[test]
    fn test_from_config_requires_valid_config() {
        let mut config = instant_config();
        config.stream.sample_secs = 0;
        config.audio.input = Some("/nonexistent/side-a.wav".into());
        assert!(App::from_config(config, &RunOptions::default()).is_err());
    }

    #[test]
    fn test_from_config_with_wav_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("side-a.wav");
        crate::audio::wav::write_wav(&path, &fragment(5000)).unwrap();

        let mut config = instant_config();
        config.audio.input = Some(path);
        config.stream.fingerprint_store_path = dir.path().join("capture.wav");
        let options = RunOptions {
            paced: false,
            ..RunOptions::default()
        };
        let handle = run(config, options).unwrap();
        handle.wait_source_done();
        let summary = handle.join();

        assert_eq!(summary.fragments, 10);
        assert_eq!(summary.final_state, Some(StreamState::Playing));
        assert!(dir.path().join("capture.wav").exists());
    }

    #[test]
    fn test_create_recognizer_rejects_blank_program() {
        let mut config = Config::default();
        config.recognizer.command = vec![" ".to_string()];
        assert!(create_recognizer(&config).is_err());
    }
}
