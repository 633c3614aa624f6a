//! Audio primitives, sources and storage formats.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod meter;
#[cfg(feature = "cpal-audio")]
pub mod output;
pub mod pcm;
pub mod player;
pub mod recorder;
pub mod ring_buffer;
pub mod wav;

pub use pcm::{PcmFormat, PcmWindow};
pub use player::{AudioSink, MockAudioSink};
pub use recorder::{AudioSource, MockAudioSource};
pub use ring_buffer::PcmRingBuffer;
