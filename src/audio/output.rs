//! Passthrough playback to a sound card output using CPAL.

use crate::audio::capture::{SendableStream, with_suppressed_stderr};
use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::audio::player::AudioSink;
use crate::error::{NeedledropError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Seconds of audio the output queue may hold before old samples are dropped.
const OUTPUT_QUEUE_SECS: u32 = 2;

fn find_output_device(device_name: &str) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if device_name == "default" {
            return host
                .default_output_device()
                .ok_or_else(|| NeedledropError::AudioDeviceNotFound {
                    device: device_name.to_string(),
                });
        }

        let devices = host
            .output_devices()
            .map_err(|e| NeedledropError::AudioPlayback {
                message: format!("Failed to enumerate devices: {}", e),
            })?;

        for dev in devices {
            if let Ok(name) = dev.name()
                && name == device_name
            {
                return Ok(dev);
            }
        }

        Err(NeedledropError::AudioDeviceNotFound {
            device: device_name.to_string(),
        })
    })
}

/// Sound card output at a fixed rate and channel count.
///
/// Writes land in a queue the device callback drains; the callback plays
/// silence when the queue runs dry. Like [`CpalAudioSource`], i16 samples
/// are tried first with an f32 fallback.
///
/// [`CpalAudioSource`]: crate::audio::capture::CpalAudioSource
pub struct CpalAudioSink {
    device: cpal::Device,
    format: PcmFormat,
    stream: Arc<Mutex<Option<SendableStream>>>,
    queue: Arc<Mutex<VecDeque<i16>>>,
    max_queued: usize,
    underruns: Arc<AtomicU64>,
}

impl CpalAudioSink {
    /// Open `device_name` ("default" selects the host default output).
    ///
    /// # Errors
    /// Returns `NeedledropError::AudioDeviceNotFound` if no such output exists.
    pub fn new(device_name: &str, format: PcmFormat) -> Result<Self> {
        let device = find_output_device(device_name)?;
        Ok(Self {
            device,
            format,
            stream: Arc::new(Mutex::new(None)),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_queued: format.frames_for_secs(OUTPUT_QUEUE_SECS) * format.channels as usize,
            underruns: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Callbacks that found the queue short and padded with silence.
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::error!("Audio output stream error: {}", err);
        };

        let queue = Arc::clone(&self.queue);
        let underruns = Arc::clone(&self.underruns);
        if let Ok(stream) = self.device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                fill(data, &queue, &underruns, |s| s);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let queue = Arc::clone(&self.queue);
        let underruns = Arc::clone(&self.underruns);
        self.device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill(data, &queue, &underruns, i16_to_f32);
                },
                err_callback,
                None,
            )
            .map_err(|e| NeedledropError::AudioPlayback {
                message: format!(
                    "Output device does not support {} playback: {}",
                    self.format, e
                ),
            })
    }
}

/// Drain queued samples into `data`, padding with silence on underrun.
fn fill<T: Default>(
    data: &mut [T],
    queue: &Mutex<VecDeque<i16>>,
    underruns: &AtomicU64,
    convert: impl Fn(i16) -> T,
) {
    let Ok(mut queue) = queue.lock() else {
        data.iter_mut().for_each(|s| *s = T::default());
        return;
    };
    if queue.len() < data.len() {
        underruns.fetch_add(1, Ordering::Relaxed);
    }
    for slot in data.iter_mut() {
        *slot = queue.pop_front().map(&convert).unwrap_or_default();
    }
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Append `samples`, then drop the oldest whole frames beyond `max_queued`.
fn enqueue(queue: &mut VecDeque<i16>, samples: &[i16], max_queued: usize, channels: usize) {
    queue.extend(samples.iter().copied());
    if queue.len() > max_queued {
        let excess = queue.len() - max_queued;
        let excess = excess.div_ceil(channels) * channels;
        queue.drain(..excess.min(queue.len()));
    }
}

impl AudioSink for CpalAudioSink {
    fn start(&mut self) -> Result<()> {
        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| NeedledropError::AudioPlayback {
                message: format!("Failed to lock stream: {}", e),
            })?;
        if stream_guard.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| NeedledropError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        *stream_guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| NeedledropError::AudioPlayback {
                message: format!("Failed to lock stream: {}", e),
            })?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| NeedledropError::AudioPlayback {
                    message: format!("Failed to stop output stream: {}", e),
                })?;
        }
        if self.underrun_count() > 0 {
            tracing::debug!("Output ran dry {} times", self.underrun_count());
        }
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write(&mut self, fragment: &PcmWindow) -> Result<()> {
        self.format.ensure_matches(&fragment.format())?;
        let mut queue = self.queue.lock().map_err(|e| NeedledropError::AudioPlayback {
            message: format!("Failed to lock output queue: {}", e),
        })?;
        enqueue(
            &mut queue,
            fragment.samples(),
            self.max_queued,
            self.format.channels as usize,
        );
        Ok(())
    }
}
