//! WAV file helpers and a file-backed audio source.

use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::audio::recorder::AudioSource;
use crate::defaults::FILE_FRAGMENT_MS;
use crate::error::{NeedledropError, Result};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::time::{Duration, Instant};

fn wav_spec(format: PcmFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode a window as 16-bit PCM WAV into any seekable writer.
pub fn write_wav_to<W: Write + Seek>(writer: W, window: &PcmWindow) -> Result<()> {
    let mut wav_writer =
        hound::WavWriter::new(writer, wav_spec(window.format())).map_err(|e| {
            NeedledropError::Storage {
                message: format!("Failed to create WAV writer: {}", e),
            }
        })?;
    for &sample in window.samples() {
        wav_writer
            .write_sample(sample)
            .map_err(|e| NeedledropError::Storage {
                message: format!("Failed to write WAV sample: {}", e),
            })?;
    }
    wav_writer.finalize().map_err(|e| NeedledropError::Storage {
        message: format!("Failed to finalize WAV file: {}", e),
    })
}

/// Write a window to `path` as 16-bit PCM WAV, replacing any existing file.
pub fn write_wav(path: &Path, window: &PcmWindow) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| NeedledropError::Storage {
        message: format!("Failed to create {}: {}", path.display(), e),
    })?;
    write_wav_to(std::io::BufWriter::new(file), window)
}

/// Decode a 16-bit PCM WAV stream into a single window.
pub fn read_wav_from<R: Read>(reader: R) -> Result<PcmWindow> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| NeedledropError::AudioCapture {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(NeedledropError::InvalidAudioFormat {
            message: format!(
                "expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }
    let format = PcmFormat::new(spec.sample_rate, spec.channels)?;

    let samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NeedledropError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    PcmWindow::with_format(format, samples)
}

/// Read a 16-bit PCM WAV file from disk.
pub fn read_wav(path: &Path) -> Result<PcmWindow> {
    let file = std::fs::File::open(path).map_err(|e| NeedledropError::AudioCapture {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    read_wav_from(std::io::BufReader::new(file))
}

/// Audio source that replays WAV file data in fixed-size fragments.
///
/// The file is kept at its native rate and channel count. When paced, each
/// fragment is released no earlier than its playback time, so the stream
/// machine sees the same timing as a live device.
pub struct WavAudioSource {
    audio: PcmWindow,
    position: usize,
    fragment_frames: usize,
    paced: bool,
    started_at: Option<Instant>,
}

impl WavAudioSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let audio = read_wav_from(reader)?;
        let fragment_frames =
            (audio.sample_rate() as usize * FILE_FRAGMENT_MS as usize / 1000).max(1);
        Ok(Self {
            audio,
            position: 0,
            fragment_frames,
            paced: false,
            started_at: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| NeedledropError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Release fragments in real time instead of as fast as they are read.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Frames per fragment.
    pub fn fragment_frames(&self) -> usize {
        self.fragment_frames
    }

    fn wait_for_playback_time(&self) {
        let Some(started_at) = self.started_at else {
            return;
        };
        let played = Duration::from_secs_f64(
            self.position as f64 / self.audio.sample_rate() as f64,
        );
        if let Some(remaining) = played.checked_sub(started_at.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.paced && self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.audio.format()
    }

    fn read_fragment(&mut self) -> Result<PcmWindow> {
        let total = self.audio.frame_count();
        if self.position >= total {
            return Ok(PcmWindow::empty(self.audio.format()));
        }

        if self.paced {
            self.wait_for_playback_time();
        }

        let channels = self.audio.channels() as usize;
        let end = std::cmp::min(self.position + self.fragment_frames, total);
        let samples = self.audio.samples()[self.position * channels..end * channels].to_vec();
        self.position = end;

        PcmWindow::with_format(self.audio.format(), samples)
    }

    fn is_finite(&self) -> bool {
        true
    }
}
