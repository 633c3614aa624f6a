//! Drives the stream machine on its worker thread the way the application
//! does: fragments in over a channel, events out through a fan-out.

use needledrop::audio::{PcmFormat, PcmWindow};
use needledrop::recognize::MockRecognizer;
use needledrop::store::MockWaveformStore;
use needledrop::stream::{
    Clock, CollectingReporter, Event, EventFanOut, FanOut, StationRunner, StreamConfig,
    StreamMachine, StreamState,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const RATE: u32 = 100;
const LOUD: i16 = 4000;
const QUIET: i16 = 3;

/// Clock that moves forward one second every time it is read, so each
/// fragment is seen one second after the previous one.
#[derive(Clone)]
struct TickingClock {
    current: Arc<Mutex<Instant>>,
}

impl TickingClock {
    fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl Clock for TickingClock {
    fn now(&self) -> Instant {
        let mut current = self.current.lock().unwrap();
        *current += Duration::from_secs(1);
        *current
    }
}

fn format() -> PcmFormat {
    PcmFormat::new(RATE, 1).unwrap()
}

fn second(level: i16) -> PcmWindow {
    PcmWindow::with_format(format(), vec![level; RATE as usize]).unwrap()
}

fn config() -> StreamConfig {
    StreamConfig {
        silence_threshold: 20,
        fingerprint_delay_secs: 2,
        fingerprint_identify_secs: 2,
        fingerprint_store_secs: 4,
        fingerprint_store_path: PathBuf::from("/captures/side-a.wav"),
        sample_secs: 10,
        stop_delay_secs: 3,
        ..StreamConfig::default()
    }
}

struct Rig {
    recognizer: MockRecognizer,
    store: MockWaveformStore,
    reporter: CollectingReporter,
}

impl Rig {
    fn new(recognizer: MockRecognizer) -> Self {
        Self {
            recognizer,
            store: MockWaveformStore::new(),
            reporter: CollectingReporter::new(),
        }
    }

    fn machine(&self) -> StreamMachine<TickingClock> {
        StreamMachine::with_clock(
            format(),
            config(),
            Box::new(self.recognizer.clone()),
            Box::new(self.store.clone()),
            TickingClock::new(),
        )
        .unwrap()
        .with_error_reporter(Arc::new(self.reporter.clone()))
    }

    /// Feed `fragments` through a runner and return what each of two
    /// subscribers saw, plus the machine's final state.
    fn run(&self, fragments: Vec<PcmWindow>) -> (Vec<Event>, Vec<Event>, StreamState) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut events: EventFanOut = FanOut::new();
        let first = events.subscribe("first");
        let second = events.subscribe("second");

        let runner = StationRunner::spawn(
            self.machine(),
            rx,
            events,
            Arc::new(self.reporter.clone()),
            Arc::new(AtomicBool::new(false)),
        );
        for fragment in fragments {
            tx.send(fragment).unwrap();
        }
        drop(tx);
        let machine = runner.join().unwrap();

        (
            first.try_iter().collect(),
            second.try_iter().collect(),
            machine.state(),
        )
    }
}

fn episode() -> Vec<PcmWindow> {
    let mut fragments = vec![second(QUIET)];
    fragments.extend(std::iter::repeat_n(second(LOUD), 9));
    fragments.extend(std::iter::repeat_n(second(QUIET), 4));
    fragments
}

#[test]
fn test_full_episode_through_runner() {
    let rig = Rig::new(MockRecognizer::new().with_response("Neu! - Hallogallo"));

    let (first, second, state) = rig.run(episode());

    let expected = vec![
        Event::StartedPlaying,
        Event::NewMetadata {
            title: "Neu! - Hallogallo".to_string(),
        },
        Event::StoppedPlaying,
    ];
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(state, StreamState::Idle);

    assert_eq!(rig.recognizer.calls(), 1);
    assert_eq!(rig.recognizer.last_sample_frames(), 2 * RATE as usize);

    let stored = rig.store.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, PathBuf::from("/captures/side-a.wav"));
    assert_eq!(stored[0].1.frame_count(), 4 * RATE as usize);
    assert!(rig.reporter.reports().is_empty());
}

#[test]
fn test_no_match_publishes_unknown_title() {
    let rig = Rig::new(MockRecognizer::new().with_no_match());

    let (events, _, _) = rig.run(episode());

    assert!(events.contains(&Event::NewMetadata {
        title: "Unknown Artist - Unknown Album".to_string()
    }));
}

#[test]
fn test_short_pause_does_not_end_episode() {
    let rig = Rig::new(MockRecognizer::new());
    let mut fragments = vec![second(LOUD); 3];
    fragments.extend(vec![second(QUIET); 2]);
    fragments.push(second(LOUD));

    let (events, _, state) = rig.run(fragments);

    assert_eq!(events, vec![Event::StartedPlaying]);
    assert_eq!(state, StreamState::Playing);
}

#[test]
fn test_two_records_make_two_episodes() {
    let rig = Rig::new(MockRecognizer::new().with_response("Harmonia - Deluxe"));
    let mut fragments = episode();
    fragments.extend(episode());

    let (events, _, _) = rig.run(fragments);

    let started = events
        .iter()
        .filter(|e| **e == Event::StartedPlaying)
        .count();
    assert_eq!(started, 2);
    assert_eq!(rig.recognizer.calls(), 2);
    assert_eq!(rig.store.calls(), 2);
    assert_eq!(events.last(), Some(&Event::StoppedPlaying));
}

#[test]
fn test_wrong_format_fragment_is_reported_not_fatal() {
    let rig = Rig::new(MockRecognizer::new());
    let stereo = PcmWindow::new(RATE, 2, vec![LOUD; 2 * RATE as usize]).unwrap();

    let (events, _, state) = rig.run(vec![stereo, second(LOUD)]);

    assert_eq!(events, vec![Event::StartedPlaying]);
    assert_eq!(state, StreamState::Playing);
    let reports = rig.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.contains("Incompatible audio format"));
}

#[test]
fn test_dropped_subscriber_does_not_stop_others() {
    let rig = Rig::new(MockRecognizer::new());
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut events: EventFanOut = FanOut::new();
    let kept = events.subscribe("kept");
    drop(events.subscribe("gone"));

    let runner = StationRunner::spawn(
        rig.machine(),
        rx,
        events,
        Arc::new(rig.reporter.clone()),
        Arc::new(AtomicBool::new(false)),
    );
    for fragment in episode() {
        tx.send(fragment).unwrap();
    }
    drop(tx);
    runner.join().unwrap();

    assert_eq!(kept.try_iter().count(), 3);
}

#[test]
fn test_run_on_current_thread() {
    let rig = Rig::new(MockRecognizer::new());
    let mut machine = rig.machine();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut events: EventFanOut = FanOut::new();
    let seen = events.subscribe("seen");

    for fragment in episode() {
        tx.send(fragment).unwrap();
    }
    drop(tx);
    machine.run(&rx, &mut events, &AtomicBool::new(false));

    assert_eq!(seen.try_iter().count(), 3);
    assert_eq!(machine.state(), StreamState::Idle);
    assert!(!machine.identification_done());
    assert!(!machine.capture_done());
}
