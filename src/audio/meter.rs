//! Peak level metering.

use crate::audio::pcm::PcmWindow;

/// Maximum absolute sample magnitude across all channels and frames.
///
/// Returns 0 for an empty window. `i16::MIN` maps to 32768.
pub fn peak_level(window: &PcmWindow) -> u16 {
    peak(window.samples())
}

/// Maximum absolute magnitude of raw samples.
pub fn peak(samples: &[i16]) -> u16 {
    samples
        .iter()
        .map(|sample| sample.unsigned_abs())
        .max()
        .unwrap_or(0)
}
