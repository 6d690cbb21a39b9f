//! Audio format definitions

use crate::protocol::sdp::AlacParameters;
use std::time::Duration;

/// Interleaved signed PCM format delivered to sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u8,
    /// Bits per sample
    pub bits_per_sample: u8,
}

impl AudioFormat {
    /// Standard CD audio format (16-bit 44.1kHz stereo)
    pub const CD_QUALITY: Self = Self {
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
    };

    /// Create a format
    #[must_use]
    pub fn new(sample_rate: u32, channels: u8, bits_per_sample: u8) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Format announced by ALAC stream parameters
    #[must_use]
    pub fn from_alac(params: &AlacParameters) -> Self {
        Self::new(params.sample_rate, params.channels, params.bit_depth)
    }

    /// Get bytes per frame (all channels for one sample)
    #[must_use]
    pub fn bytes_per_frame(self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8) * usize::from(self.channels)
    }

    /// Calculate duration for given number of frames
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn frames_to_duration(self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::CD_QUALITY
    }
}
