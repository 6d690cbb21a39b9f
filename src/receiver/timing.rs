//! Timing synchronization for the RAOP player
//!
//! The player answers the sender's timing requests and, while recording,
//! issues its own requests to estimate the sender's clock offset.

use super::channel::{PacketHandler, RtpChannel};
use crate::audio::AudioSink;
use crate::protocol::rtp::{NtpTimestamp, RaopPayloadType, TimingPacket};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Clock synchronization state
#[derive(Debug, Default)]
pub struct ClockSync {
    /// Smoothed offset (remote - local) in microseconds
    offset_micros: i64,
    /// Last round-trip delay in microseconds
    round_trip_micros: i64,
    /// Number of exchanges folded in
    exchange_count: u32,
    /// Moving average of offset
    offset_avg: f64,
    /// When the last response arrived
    last_sync: Option<Instant>,
}

impl ClockSync {
    /// Create new clock sync state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a timing response that arrived at `arrival`
    ///
    /// The first exchanges move the average quickly, later ones smooth it.
    pub fn update(&mut self, response: &TimingPacket, arrival: NtpTimestamp) {
        let offset = response.clock_offset(arrival);

        let alpha = if self.exchange_count < 10 { 0.5 } else { 0.1 };
        #[allow(
            clippy::cast_precision_loss,
            reason = "Precision loss acceptable for moving average"
        )]
        {
            self.offset_avg = if self.exchange_count == 0 {
                offset as f64
            } else {
                (1.0 - alpha) * self.offset_avg + alpha * (offset as f64)
            };
        }

        #[allow(clippy::cast_possible_truncation, reason = "Offset fits in i64")]
        {
            self.offset_micros = self.offset_avg as i64;
        }
        self.round_trip_micros = response.round_trip(arrival);
        self.exchange_count = self.exchange_count.saturating_add(1);
        self.last_sync = Some(Instant::now());
    }

    /// Get current offset in microseconds
    #[must_use]
    pub fn offset_micros(&self) -> i64 {
        self.offset_micros
    }

    /// Get last round-trip delay in microseconds
    #[must_use]
    pub fn round_trip_micros(&self) -> i64 {
        self.round_trip_micros
    }

    /// Timing exchanges folded into the offset so far
    #[must_use]
    pub fn exchange_count(&self) -> u32 {
        self.exchange_count
    }

    /// Check if no response arrived within `max_age`
    #[must_use]
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.last_sync.is_none_or(|at| at.elapsed() > max_age)
    }

    /// Forget every exchange
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timing channel handler of the player
pub struct TimingHandler {
    clock: Arc<Mutex<ClockSync>>,
    sink: Arc<dyn AudioSink>,
}

impl TimingHandler {
    /// Handler updating `clock` and reporting offsets to `sink`
    #[must_use]
    pub fn new(clock: Arc<Mutex<ClockSync>>, sink: Arc<dyn AudioSink>) -> Self {
        Self { clock, sink }
    }
}

#[async_trait]
impl PacketHandler for TimingHandler {
    async fn on_packet(&self, channel: &RtpChannel, datagram: Bytes, from: SocketAddr) {
        let arrival = NtpTimestamp::now();

        let packet = match TimingPacket::decode(&datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(from = %from, error = %e, "ignoring datagram on timing channel");
                return;
            }
        };

        match packet.payload_type {
            RaopPayloadType::TimingRequest => {
                let response = TimingPacket::response_to(&packet, arrival, NtpTimestamp::now());
                if let Err(e) = channel.send_to(&response.encode(), from).await {
                    tracing::debug!(to = %from, error = %e, "timing response not sent");
                }
            }
            RaopPayloadType::TimingResponse => {
                let offset = {
                    let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
                    clock.update(&packet, arrival);
                    clock.offset_micros()
                };
                tracing::trace!(offset_micros = offset, "clock offset updated");
                self.sink.clock_offset(offset);
            }
            _ => {}
        }
    }
}

/// Send a timing request on `channel` every `interval` until cancelled
///
/// The channel must be connected to the sender's timing port.
pub fn spawn_timing_requests(
    channel: RtpChannel,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut sequence: u16 = 0;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let request = TimingPacket::request(sequence, NtpTimestamp::now());
                    sequence = sequence.wrapping_add(1);
                    if let Err(e) = channel.send(&request.encode()).await {
                        tracing::debug!(error = %e, "timing request not sent");
                    }
                }
            }
        }
    })
}
