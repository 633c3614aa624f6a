//! Persistence of captured waveforms.

use crate::audio::pcm::PcmWindow;
use crate::audio::wav::write_wav;
use crate::error::{NeedledropError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trait for writing a captured waveform somewhere durable.
pub trait WaveformStore: Send {
    /// Store `window` at `destination`, replacing what was there.
    fn store(&self, window: &PcmWindow, destination: &Path) -> Result<()>;
}

/// Writes 16-bit PCM WAV files, creating parent directories as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavFileStore;

impl WaveformStore for WavFileStore {
    fn store(&self, window: &PcmWindow, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| NeedledropError::Storage {
                message: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }
        write_wav(destination, window)?;
        tracing::info!(
            "Stored {:.1}s of audio to {}",
            window.duration().as_secs_f64(),
            destination.display()
        );
        Ok(())
    }
}

/// Mock store for testing. Clones share the record of stored windows.
#[derive(Debug, Clone, Default)]
pub struct MockWaveformStore {
    stored: Arc<Mutex<Vec<(PathBuf, PcmWindow)>>>,
    should_fail: bool,
}

impl MockWaveformStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on store.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Every `(destination, window)` handed to the store, in order.
    pub fn stored(&self) -> Vec<(PathBuf, PcmWindow)> {
        self.stored
            .lock()
            .map(|stored| stored.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.stored.lock().map(|stored| stored.len()).unwrap_or(0)
    }
}

impl WaveformStore for MockWaveformStore {
    fn store(&self, window: &PcmWindow, destination: &Path) -> Result<()> {
        if let Ok(mut stored) = self.stored.lock() {
            stored.push((destination.to_path_buf(), window.clone()));
        }
        if self.should_fail {
            return Err(NeedledropError::Storage {
                message: "mock storage failure".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/fingerprint.wav");
        let window = PcmWindow::new(44100, 2, vec![1, -1, 2, -2]).unwrap();

        WavFileStore.store(&window, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    }

    #[test]
    fn test_wav_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprint.wav");
        let first = PcmWindow::new(8000, 1, vec![1; 100]).unwrap();
        let second = PcmWindow::new(8000, 1, vec![2; 10]).unwrap();

        WavFileStore.store(&first, &path).unwrap();
        WavFileStore.store(&second, &path).unwrap();

        assert_eq!(crate::audio::wav::read_wav(&path).unwrap(), second);
    }

    #[test]
    fn test_wav_file_store_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let window = PcmWindow::new(8000, 1, vec![0; 8]).unwrap();

        let result = WavFileStore.store(&window, &blocker.join("out.wav"));
        assert!(matches!(result, Err(NeedledropError::Storage { .. })));
    }

    #[test]
    fn test_mock_store_records_and_fails() {
        let store = MockWaveformStore::new().with_failure();
        let window = PcmWindow::new(8000, 1, vec![0; 8]).unwrap();

        assert!(store.store(&window, Path::new("/tmp/x.wav")).is_err());
        assert_eq!(store.calls(), 1);
        assert_eq!(store.stored()[0].0, PathBuf::from("/tmp/x.wav"));
    }
}
