//! Interleaved 16-bit PCM windows.
//!
//! A [`PcmWindow`] is the unit of audio exchanged between the capture side,
//! the stream machine and its collaborators. Samples are interleaved per
//! channel; all addressing is in frames (one sample per channel).

use crate::error::{NeedledropError, Result};
use std::time::Duration;

/// Sample rate and channel count shared by every window in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Creates a format, rejecting a zero sample rate or channel count.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(NeedledropError::InvalidAudioFormat {
                message: "sample rate must be positive".to_string(),
            });
        }
        if channels == 0 {
            return Err(NeedledropError::InvalidAudioFormat {
                message: "channel count must be positive".to_string(),
            });
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Bytes per frame at 16 bits per sample.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * 2
    }

    /// Number of frames covering `secs` seconds.
    pub fn frames_for_secs(&self, secs: u32) -> usize {
        self.sample_rate as usize * secs as usize
    }

    pub(crate) fn ensure_matches(&self, other: &PcmFormat) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(NeedledropError::IncompatibleAudioFormat {
                expected: self.to_string(),
                actual: other.to_string(),
            })
        }
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// A contiguous span of interleaved 16-bit audio.
///
/// Invariant: `samples.len()` is a multiple of `format.channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmWindow {
    format: PcmFormat,
    samples: Vec<i16>,
}

impl PcmWindow {
    /// Creates a window from interleaved samples.
    ///
    /// Fails if the format is invalid or the samples do not form whole frames.
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Result<Self> {
        let format = PcmFormat::new(sample_rate, channels)?;
        Self::with_format(format, samples)
    }

    /// Creates a window for an already validated format.
    pub fn with_format(format: PcmFormat, samples: Vec<i16>) -> Result<Self> {
        if samples.len() % format.channels as usize != 0 {
            return Err(NeedledropError::InvalidAudioFormat {
                message: format!(
                    "{} samples is not a whole number of {}-channel frames",
                    samples.len(),
                    format.channels
                ),
            });
        }
        Ok(Self { format, samples })
    }

    /// Creates an empty window.
    pub fn empty(format: PcmFormat) -> Self {
        Self {
            format,
            samples: Vec::new(),
        }
    }

    /// Decodes little-endian 16-bit bytes, as delivered by ALSA `S16_LE`.
    ///
    /// Trailing bytes that do not complete a frame are rejected.
    pub fn from_le_bytes(format: PcmFormat, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % format.frame_size() != 0 {
            return Err(NeedledropError::InvalidAudioFormat {
                message: format!(
                    "{} bytes is not a whole number of {}-byte frames",
                    bytes.len(),
                    format.frame_size()
                ),
            });
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { format, samples })
    }

    /// Encodes the samples as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    /// Raw interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count() as f64 / self.format.sample_rate as f64)
    }

    /// Iterates over frames, each a slice of one sample per channel.
    pub fn frames(&self) -> impl Iterator<Item = &[i16]> {
        self.samples.chunks_exact(self.format.channels as usize)
    }

    /// Appends another window of the same format.
    pub fn append(&mut self, other: &PcmWindow) -> Result<()> {
        self.format.ensure_matches(&other.format)?;
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Splits interleaved samples into one vector per channel.
    pub fn channel_data(&self) -> Vec<Vec<i16>> {
        let channels = self.format.channels as usize;
        (0..channels)
            .map(|channel| {
                self.samples
                    .iter()
                    .skip(channel)
                    .step_by(channels)
                    .copied()
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleave(channels: &[Vec<i16>]) -> Vec<i16> {
        let frames = channels[0].len();
        (0..frames)
            .flat_map(|frame| channels.iter().map(move |ch| ch[frame]))
            .collect()
    }

    #[test]
    fn test_format_rejects_zero_rate() {
        let result = PcmFormat::new(0, 2);
        assert!(matches!(
            result,
            Err(NeedledropError::InvalidAudioFormat { .. })
        ));
    }

    #[test]
    fn test_format_rejects_zero_channels() {
        let result = PcmFormat::new(44100, 0);
        assert!(matches!(
            result,
            Err(NeedledropError::InvalidAudioFormat { .. })
        ));
    }

    #[test]
    fn test_window_rejects_partial_frame() {
        let result = PcmWindow::new(44100, 2, vec![1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_count_and_duration() {
        let window = PcmWindow::new(100, 2, vec![0; 100]).unwrap();
        assert_eq!(window.frame_count(), 50);
        assert_eq!(window.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_append_same_format() {
        let mut a = PcmWindow::new(48000, 1, vec![1, 2]).unwrap();
        let b = PcmWindow::new(48000, 1, vec![3]).unwrap();
        a.append(&b).unwrap();
        assert_eq!(a.samples(), &[1, 2, 3]);
    }

    #[test]
    fn test_append_mismatched_rate_fails() {
        let mut a = PcmWindow::new(48000, 1, vec![1, 2]).unwrap();
        let b = PcmWindow::new(44100, 1, vec![3]).unwrap();
        let err = a.append(&b).unwrap_err();
        assert!(matches!(
            err,
            NeedledropError::IncompatibleAudioFormat { .. }
        ));
        assert_eq!(a.samples(), &[1, 2]);
    }

    #[test]
    fn test_append_mismatched_channels_fails() {
        let mut a = PcmWindow::new(48000, 2, vec![1, 2]).unwrap();
        let b = PcmWindow::new(48000, 1, vec![3]).unwrap();
        assert!(a.append(&b).is_err());
    }

    #[test]
    fn test_le_bytes_are_bit_exact() {
        let samples = vec![i16::MIN, -1, 0, 1, i16::MAX, 12345];
        let window = PcmWindow::new(44100, 2, samples.clone()).unwrap();
        let bytes = window.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..2], &[0x00, 0x80]);

        let decoded = PcmWindow::from_le_bytes(window.format(), &bytes).unwrap();
        assert_eq!(decoded.samples(), samples.as_slice());
    }

    #[test]
    fn test_from_le_bytes_rejects_partial_frame() {
        let format = PcmFormat::new(44100, 2).unwrap();
        assert!(PcmWindow::from_le_bytes(format, &[0, 0, 0]).is_err());
    }

    #[test]
    fn test_channel_data_mono() {
        let channels = vec![vec![1i16; 10]];
        let window = PcmWindow::new(48000, 1, interleave(&channels)).unwrap();
        assert_eq!(window.channel_data(), channels);
    }

    #[test]
    fn test_channel_data_stereo() {
        let channels = vec![vec![1i16; 10], vec![2i16; 10]];
        let window = PcmWindow::new(48000, 2, interleave(&channels)).unwrap();
        assert_eq!(window.channel_data(), channels);
    }

    #[test]
    fn test_channel_data_ten_channels() {
        let channels: Vec<Vec<i16>> = (0..10).map(|i| vec![i as i16; 10]).collect();
        let window = PcmWindow::new(48000, 10, interleave(&channels)).unwrap();
        assert_eq!(window.channel_data(), channels);
    }

    #[test]
    fn test_frames_iterates_per_frame() {
        let window = PcmWindow::new(48000, 2, vec![1, 2, 3, 4]).unwrap();
        let frames: Vec<&[i16]> = window.frames().collect();
        assert_eq!(frames, vec![&[1, 2][..], &[3, 4][..]]);
    }

    #[test]
    fn test_format_display() {
        let format = PcmFormat::new(44100, 2).unwrap();
        assert_eq!(format.to_string(), "44100Hz/2ch");
    }
}
