//! Bounded rolling window of recent PCM audio.
//!
//! - Fixed format and capacity (in frames) for its whole lifetime
//! - FIFO eviction: once full, each append drops exactly enough old frames
//! - Frame-addressed slicing with negative indices counted from the newest frame
//! - Every export is a copy; callers never see the live storage

use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::error::{NeedledropError, Result};
use std::collections::VecDeque;

/// Rolling PCM buffer owned by the stream machine.
#[derive(Debug, Clone)]
pub struct PcmRingBuffer {
    format: PcmFormat,
    capacity_frames: usize,
    samples: VecDeque<i16>,
}

impl PcmRingBuffer {
    /// Creates an empty buffer holding at most `capacity_frames` frames.
    pub fn new(format: PcmFormat, capacity_frames: usize) -> Result<Self> {
        if capacity_frames == 0 {
            return Err(NeedledropError::InvalidAudioFormat {
                message: "ring buffer capacity must be at least one frame".to_string(),
            });
        }
        if capacity_frames
            .checked_mul(format.channels as usize)
            .is_none()
        {
            return Err(NeedledropError::InvalidAudioFormat {
                message: format!("ring buffer capacity of {} frames is too large", capacity_frames),
            });
        }
        // Storage grows with the audio actually appended.
        Ok(Self {
            format,
            capacity_frames,
            samples: VecDeque::new(),
        })
    }

    /// Creates a buffer sized to hold `secs` seconds of audio.
    pub fn with_seconds(format: PcmFormat, secs: u32) -> Result<Self> {
        Self::new(format, format.frames_for_secs(secs))
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frame_count() == self.capacity_frames
    }

    fn channels(&self) -> usize {
        self.format.channels as usize
    }

    /// Appends a window, evicting the oldest frames beyond capacity.
    ///
    /// A format mismatch fails with `IncompatibleAudioFormat` and leaves the
    /// buffer untouched.
    pub fn append(&mut self, window: &PcmWindow) -> Result<()> {
        self.format.ensure_matches(&window.format())?;

        let capacity_samples = self.capacity_frames * self.channels();
        let incoming = window.samples();

        // Only the newest `capacity` frames of an oversized window can survive.
        let incoming = if incoming.len() > capacity_samples {
            &incoming[incoming.len() - capacity_samples..]
        } else {
            incoming
        };

        let overflow = (self.samples.len() + incoming.len()).saturating_sub(capacity_samples);
        self.samples.drain(..overflow);
        self.samples.extend(incoming.iter().copied());
        Ok(())
    }

    /// Copies the frame range `[start, end)` into a new window.
    ///
    /// Negative indices count from the end (`-1` is the newest frame).
    /// Indices are clamped to the available history, so a range lying
    /// entirely before the oldest retained frame yields an empty window.
    pub fn slice(&self, start: isize, end: isize) -> PcmWindow {
        let len = self.frame_count();
        let start = resolve_index(start, len);
        let end = resolve_index(end, len);
        if start >= end {
            return PcmWindow::empty(self.format);
        }

        let channels = self.channels();
        let samples: Vec<i16> = self
            .samples
            .range(start * channels..end * channels)
            .copied()
            .collect();
        PcmWindow::with_format(self.format, samples)
            .unwrap_or_else(|_| PcmWindow::empty(self.format))
    }

    /// Copies the newest `frames` frames (fewer if less history is available).
    pub fn tail(&self, frames: usize) -> PcmWindow {
        let len = self.frame_count();
        let start = len.saturating_sub(frames);
        self.slice(start as isize, len as isize)
    }

    /// Copies the newest `secs` seconds of audio.
    pub fn tail_secs(&self, secs: u32) -> PcmWindow {
        self.tail(self.format.frames_for_secs(secs))
    }

    /// Copies the full contents, oldest frame first.
    pub fn snapshot(&self) -> PcmWindow {
        let len = self.frame_count() as isize;
        self.slice(0, len)
    }
}

/// Maps a possibly negative frame index onto `0..=len`.
fn resolve_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}
