use crate::audio::pcm::PcmWindow;
use crate::error::{NeedledropError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A successful identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Display title, typically "Artist - Album".
    pub title: String,
}

impl Identification {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

/// Trait for audio fingerprint recognition.
///
/// This trait allows swapping implementations (external command, mock).
pub trait Recognizer: Send {
    /// Identify the record playing in `sample`.
    ///
    /// # Returns
    /// `Ok(Some(_))` on a match, `Ok(None)` when nothing matched, or an
    /// error if the lookup itself failed.
    fn identify(&self, sample: &PcmWindow) -> Result<Option<Identification>>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

impl<T: Recognizer + Sync> Recognizer for Arc<T> {
    fn identify(&self, sample: &PcmWindow) -> Result<Option<Identification>> {
        (**self).identify(sample)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Recognizer that never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecognizer;

impl Recognizer for NullRecognizer {
    fn identify(&self, _sample: &PcmWindow) -> Result<Option<Identification>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[derive(Debug, Clone)]
enum MockOutcome {
    Match(String),
    NoMatch,
    Failure,
}

/// Mock recognizer for testing.
///
/// Clones share the call counter and the last sample seen.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    outcomes: Vec<MockOutcome>,
    calls: Arc<AtomicUsize>,
    last_frames: Arc<AtomicUsize>,
}

impl MockRecognizer {
    /// Create a mock that matches with a fixed title.
    pub fn new() -> Self {
        Self {
            outcomes: vec![MockOutcome::Match("mock artist - mock album".to_string())],
            calls: Arc::new(AtomicUsize::new(0)),
            last_frames: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific title.
    pub fn with_response(mut self, title: &str) -> Self {
        self.outcomes = vec![MockOutcome::Match(title.to_string())];
        self
    }

    /// Configure the mock to find no match.
    pub fn with_no_match(mut self) -> Self {
        self.outcomes = vec![MockOutcome::NoMatch];
        self
    }

    /// Configure the mock to fail on identify.
    pub fn with_failure(mut self) -> Self {
        self.outcomes = vec![MockOutcome::Failure];
        self
    }

    /// Fail the first `failures` calls, then match with `title`.
    pub fn with_failures_then(mut self, failures: usize, title: &str) -> Self {
        self.outcomes = vec![MockOutcome::Failure; failures];
        self.outcomes.push(MockOutcome::Match(title.to_string()));
        self
    }

    /// Number of identify calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Frame count of the most recent sample.
    pub fn last_sample_frames(&self) -> usize {
        self.last_frames.load(Ordering::SeqCst)
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer for MockRecognizer {
    fn identify(&self, sample: &PcmWindow) -> Result<Option<Identification>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_frames
            .store(sample.frame_count(), Ordering::SeqCst);

        // The last outcome repeats once the script runs out.
        let outcome = self
            .outcomes
            .get(call)
            .or_else(|| self.outcomes.last())
            .cloned()
            .unwrap_or(MockOutcome::NoMatch);

        match outcome {
            MockOutcome::Match(title) => Ok(Some(Identification::new(title))),
            MockOutcome::NoMatch => Ok(None),
            MockOutcome::Failure => Err(NeedledropError::Recognition {
                message: "mock recognition failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PcmWindow {
        PcmWindow::new(44100, 2, vec![0; 200]).unwrap()
    }

    #[test]
    fn test_null_recognizer_never_matches() {
        assert_eq!(NullRecognizer.identify(&sample()).unwrap(), None);
    }

    #[test]
    fn test_mock_returns_response() {
        let recognizer = MockRecognizer::new().with_response("Neu! - Neu! 75");
        let result = recognizer.identify(&sample()).unwrap();
        assert_eq!(result, Some(Identification::new("Neu! - Neu! 75")));
        assert_eq!(recognizer.calls(), 1);
        assert_eq!(recognizer.last_sample_frames(), 100);
    }

    #[test]
    fn test_mock_failure() {
        let recognizer = MockRecognizer::new().with_failure();
        match recognizer.identify(&sample()) {
            Err(NeedledropError::Recognition { message }) => {
                assert_eq!(message, "mock recognition failure");
            }
            _ => panic!("Expected Recognition error"),
        }
    }

    #[test]
    fn test_mock_failures_then_match() {
        let recognizer = MockRecognizer::new().with_failures_then(2, "X - Y");
        assert!(recognizer.identify(&sample()).is_err());
        assert!(recognizer.identify(&sample()).is_err());
        assert_eq!(
            recognizer.identify(&sample()).unwrap(),
            Some(Identification::new("X - Y"))
        );
        assert_eq!(
            recognizer.identify(&sample()).unwrap(),
            Some(Identification::new("X - Y"))
        );
    }

    #[test]
    fn test_clones_share_call_count() {
        let recognizer = MockRecognizer::new().with_no_match();
        let observer = recognizer.clone();
        recognizer.identify(&sample()).unwrap();
        assert_eq!(observer.calls(), 1);
    }
}
