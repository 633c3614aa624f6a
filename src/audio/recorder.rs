use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::error::{NeedledropError, Result};
use std::collections::VecDeque;

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device, WAV file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Format of every fragment this source produces.
    fn format(&self) -> PcmFormat;

    /// Read the audio captured since the last call.
    ///
    /// An empty window means nothing is available yet (live sources) or the
    /// source is exhausted (finite sources).
    fn read_fragment(&mut self) -> Result<PcmWindow>;

    /// Whether an empty read means end of input.
    fn is_finite(&self) -> bool {
        false
    }
}

impl AudioSource for Box<dyn AudioSource> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn format(&self) -> PcmFormat {
        (**self).format()
    }

    fn read_fragment(&mut self) -> Result<PcmWindow> {
        (**self).read_fragment()
    }

    fn is_finite(&self) -> bool {
        (**self).is_finite()
    }
}

/// Mock audio source for testing.
///
/// Plays back a scripted list of fragments, then reports exhaustion.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    format: PcmFormat,
    fragments: VecDeque<PcmWindow>,
    is_started: bool,
    should_fail_start: bool,
    should_fail_read: bool,
}

impl MockAudioSource {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            fragments: VecDeque::new(),
            is_started: false,
            should_fail_start: false,
            should_fail_read: false,
        }
    }

    /// Queue fragments to be returned by successive reads.
    pub fn with_fragments(mut self, fragments: Vec<PcmWindow>) -> Self {
        self.fragments = fragments.into();
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(NeedledropError::AudioCapture {
                message: "mock start failure".to_string(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read_fragment(&mut self) -> Result<PcmWindow> {
        if self.should_fail_read {
            return Err(NeedledropError::AudioCapture {
                message: "mock read failure".to_string(),
            });
        }
        Ok(self
            .fragments
            .pop_front()
            .unwrap_or_else(|| PcmWindow::empty(self.format)))
    }

    fn is_finite(&self) -> bool {
        true
    }
}
