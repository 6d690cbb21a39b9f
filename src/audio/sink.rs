use super::AudioFormat;
use crate::protocol::rtp::NtpTimestamp;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Errors from audio output
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink has not been started or was stopped
    #[error("output closed")]
    Closed,

    /// Generic device error
    #[error("device error: {0}")]
    Device(String),
}

/// Audio output the receiver delivers decoded PCM to
///
/// Ordering, buffering and backpressure are the sink's concern; the
/// receiver enqueues every decoded packet keyed by its RTP timestamp.
pub trait AudioSink: Send + Sync {
    /// Prepare the device for a stream in `format`
    fn start(&self, format: AudioFormat) -> Result<(), SinkError>;

    /// Queue one packet of interleaved samples
    fn enqueue(&self, timestamp: u32, samples: &[i16]) -> Result<(), SinkError>;

    /// Drop everything queued but not yet played
    fn flush(&self);

    fn stop(&self);

    /// Set the linear device gain
    fn set_gain(&self, gain: f32);

    fn gain(&self) -> f32;

    /// Device gain range `(min, max)`
    fn gain_range(&self) -> (f32, f32) {
        (0.0, 1.0)
    }

    /// Sender's mapping of an RTP timestamp to wall-clock time
    fn sync(&self, _rtp_timestamp: u32, _ntp: NtpTimestamp) {}

    /// Estimated offset of the sender's clock from ours, in microseconds
    fn clock_offset(&self, _offset_micros: i64) {}
}

/// Store an `f32` gain in an atomic
#[derive(Debug)]
struct AtomicGain(AtomicU32);

impl AtomicGain {
    fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }
}

/// Sink that discards audio
#[derive(Debug)]
pub struct NullSink {
    gain: AtomicGain,
}

impl Default for NullSink {
    fn default() -> Self {
        Self {
            gain: AtomicGain::new(1.0),
        }
    }
}

impl AudioSink for NullSink {
    fn start(&self, _format: AudioFormat) -> Result<(), SinkError> {
        Ok(())
    }

    fn enqueue(&self, _timestamp: u32, _samples: &[i16]) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&self) {}

    fn stop(&self) {}

    fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }

    fn gain(&self) -> f32 {
        self.gain.load()
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    format: Option<AudioFormat>,
    packets: Vec<(u32, Vec<i16>)>,
    flushes: usize,
    last_sync: Option<(u32, NtpTimestamp)>,
    clock_offset: Option<i64>,
}

/// Sink that keeps delivered packets in memory
///
/// Useful for hosts that post-process audio themselves, and for tests.
#[derive(Debug)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
    gain: AtomicGain,
    range: (f32, f32),
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_gain_range(0.0, 1.0)
    }
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink reporting a custom device gain range
    #[must_use]
    pub fn with_gain_range(min: f32, max: f32) -> Self {
        Self {
            state: Mutex::new(MemorySinkState::default()),
            gain: AtomicGain::new(max),
            range: (min, max),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemorySinkState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Format passed to the last `start`, `None` after `stop`
    #[must_use]
    pub fn format(&self) -> Option<AudioFormat> {
        self.with_state(|s| s.format)
    }

    /// Packets queued since the last flush, in arrival order
    #[must_use]
    pub fn packets(&self) -> Vec<(u32, Vec<i16>)> {
        self.with_state(|s| s.packets.clone())
    }

    /// Number of flushes received
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.with_state(|s| s.flushes)
    }

    /// Last sync point: RTP timestamp and its NTP time
    #[must_use]
    pub fn last_sync(&self) -> Option<(u32, NtpTimestamp)> {
        self.with_state(|s| s.last_sync)
    }

    /// Last clock offset reported, in microseconds
    #[must_use]
    pub fn last_clock_offset(&self) -> Option<i64> {
        self.with_state(|s| s.clock_offset)
    }
}

impl AudioSink for MemorySink {
    fn start(&self, format: AudioFormat) -> Result<(), SinkError> {
        self.with_state(|s| s.format = Some(format));
        Ok(())
    }

    fn enqueue(&self, timestamp: u32, samples: &[i16]) -> Result<(), SinkError> {
        self.with_state(|s| {
            if s.format.is_none() {
                return Err(SinkError::Closed);
            }
            s.packets.push((timestamp, samples.to_vec()));
            Ok(())
        })
    }

    fn flush(&self) {
        self.with_state(|s| {
            s.packets.clear();
            s.flushes += 1;
        });
    }

    fn stop(&self) {
        self.with_state(|s| s.format = None);
    }

    fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }

    fn gain(&self) -> f32 {
        self.gain.load()
    }

    fn gain_range(&self) -> (f32, f32) {
        self.range
    }

    fn sync(&self, rtp_timestamp: u32, ntp: NtpTimestamp) {
        self.with_state(|s| s.last_sync = Some((rtp_timestamp, ntp)));
    }

    fn clock_offset(&self, offset_micros: i64) {
        self.with_state(|s| s.clock_offset = Some(offset_micros));
    }
}
