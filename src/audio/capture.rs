//! Live capture from a sound card input using CPAL.

use crate::audio::pcm::{PcmFormat, PcmWindow};
use crate::audio::recorder::AudioSource;
use crate::error::{NeedledropError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probes every backend it knows about and ALSA/JACK print to stderr
/// for each one that is absent.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(super) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK and PipeWire backend probing.
///
/// Must be called at startup before any audio threads are spawned.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before any capture or worker thread exists
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// List input device names. The host default is marked with "\[default\]".
pub fn list_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = devices.map_err(|e| NeedledropError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if default_name.as_deref() == Some(name.as_str()) {
                device_names.push(format!("{} [default]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

fn find_device(device_name: &str) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if device_name == "default" {
            return host
                .default_input_device()
                .ok_or_else(|| NeedledropError::AudioDeviceNotFound {
                    device: device_name.to_string(),
                });
        }

        let devices = host
            .input_devices()
            .map_err(|e| NeedledropError::AudioCapture {
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

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through its owner's Mutex, and only
/// to play or pause it.
pub(super) struct SendableStream(pub(super) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Sound card capture at a fixed rate and channel count.
///
/// Opens the device with i16 samples at the requested format, falling back
/// to f32 samples converted in the callback. Devices that support neither
/// at the requested rate and channel count are rejected at start.
pub struct CpalAudioSource {
    device: cpal::Device,
    format: PcmFormat,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
}

impl CpalAudioSource {
    /// Open `device_name` ("default" selects the host default input).
    ///
    /// # Errors
    /// Returns `NeedledropError::AudioDeviceNotFound` if no such input exists.
    pub fn new(device_name: &str, format: PcmFormat) -> Result<Self> {
        let device = find_device(device_name)?;
        Ok(Self {
            device,
            format,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Number of data callbacks delivered since creation.
    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::error!("Audio stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        self.device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                    }
                },
                err_callback,
                None,
            )
            .map_err(|e| NeedledropError::AudioCapture {
                message: format!(
                    "Device does not support {} capture: {}. \
                     Try a different --device or adjust [audio] in the config.",
                    self.format, e
                ),
            })
    }
}

pub(super) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| NeedledropError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if stream_guard.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| NeedledropError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        tracing::info!("Capturing {} from input device", self.format);

        *stream_guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| NeedledropError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| NeedledropError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read_fragment(&mut self) -> Result<PcmWindow> {
        let mut buffer = self.buffer.lock().map_err(|e| NeedledropError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;

        // Keep a trailing partial frame for the next read.
        let channels = self.format.channels as usize;
        let whole = buffer.len() - buffer.len() % channels;
        let samples: Vec<i16> = buffer.drain(..whole).collect();
        PcmWindow::with_format(self.format, samples)
    }

    fn is_finite(&self) -> bool {
        false
    }
}
