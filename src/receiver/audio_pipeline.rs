//! Audio data path of the player
//!
//! Audio datagrams are checked for sequence gaps, decrypted, decoded and
//! handed to the sink. Gaps trigger a retransmit request on the control
//! channel; retransmitted packets re-enter the same path.

use super::channel::{PacketHandler, RtpChannel};
use super::sequence_tracker::{GapInfo, SequenceTracker};
use crate::audio::{AudioDecoder, AudioFormat, AudioSink, DecoderFactory};
use crate::error::RaopError;
use crate::protocol::crypto::AudioDecryptor;
use crate::protocol::rtp::{
    RaopAudioPacket, RaopPayloadType, RetransmitRequest, RetransmitResponse, SyncPacket,
};
use crate::protocol::sdp::StreamDescription;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrypt, decode and deliver path for one announced stream
pub struct AudioPipeline {
    format: AudioFormat,
    decryptor: Option<AudioDecryptor>,
    decoder: Mutex<Box<dyn AudioDecoder>>,
    sink: Arc<dyn AudioSink>,
    tracker: Mutex<SequenceTracker>,
    control: Mutex<Option<RtpChannel>>,
    request_sequence: AtomicU16,
}

impl AudioPipeline {
    /// Build the pipeline for an announced stream
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Decode` if the decoder rejects the stream's format.
    pub fn new(
        stream: &StreamDescription,
        decoders: &dyn DecoderFactory,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, RaopError> {
        let decoder = decoders.create(stream)?;
        Ok(Self {
            format: decoder.format(),
            decryptor: stream.decryptor(),
            decoder: Mutex::new(decoder),
            sink,
            tracker: Mutex::new(SequenceTracker::new()),
            control: Mutex::new(None),
            request_sequence: AtomicU16::new(0),
        })
    }

    /// Format reported by the decoder
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Sink receiving decoded audio
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    /// Channel retransmit requests are sent on
    pub fn set_control(&self, channel: Option<RtpChannel>) {
        *lock(&self.control) = channel;
    }

    /// Start the sink with the stream's format
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Sink` if the sink cannot start.
    pub fn start(&self) -> Result<(), RaopError> {
        self.sink.start(self.format)?;
        Ok(())
    }

    /// Handle an audio datagram from the sender
    ///
    /// # Errors
    ///
    /// Returns an error if the packet cannot be decoded or delivered.
    pub async fn process_audio(&self, datagram: &[u8]) -> Result<(), RaopError> {
        let packet = RaopAudioPacket::decode(datagram)?;

        let gap = lock(&self.tracker).record(packet.sequence);
        if let Some(gap) = gap {
            self.request_retransmit(gap).await;
        }

        self.deliver(&packet)
    }

    /// Handle a retransmit response from the control channel
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded packet cannot be decoded or delivered.
    pub fn process_retransmitted(&self, datagram: &[u8]) -> Result<(), RaopError> {
        let packet = RaopAudioPacket::decode(RetransmitResponse::audio_packet(datagram)?)?;
        tracing::trace!(sequence = packet.sequence, "retransmitted packet received");
        self.deliver(&packet)
    }

    /// Drop queued audio and forget the sequence history
    pub fn flush(&self) {
        self.sink.flush();
        lock(&self.tracker).reset();
    }

    /// Stop the sink
    pub fn stop(&self) {
        self.sink.stop();
    }

    fn deliver(&self, packet: &RaopAudioPacket) -> Result<(), RaopError> {
        let mut payload = packet.payload.to_vec();
        if let Some(decryptor) = &self.decryptor {
            decryptor.decrypt_in_place(&mut payload);
        }

        let samples = lock(&self.decoder).decode(&payload)?;
        self.sink.enqueue(packet.timestamp, &samples)?;
        Ok(())
    }

    async fn request_retransmit(&self, gap: GapInfo) {
        let control = lock(&self.control).clone();
        let Some(control) = control else {
            tracing::debug!(start = gap.start, count = gap.count, "packets lost, no control channel");
            return;
        };

        let request = RetransmitRequest {
            sequence: self.request_sequence.fetch_add(1, Ordering::Relaxed),
            seq_start: gap.start,
            count: gap.count,
        };
        tracing::debug!(start = gap.start, count = gap.count, "requesting retransmit");

        if let Err(e) = control.send(&request.encode()).await {
            tracing::warn!(error = %e, "retransmit request not sent");
        }
    }
}

/// Audio channel handler
pub struct AudioHandler {
    pipeline: Arc<AudioPipeline>,
}

impl AudioHandler {
    /// Handler feeding `pipeline`
    #[must_use]
    pub fn new(pipeline: Arc<AudioPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl PacketHandler for AudioHandler {
    async fn on_packet(&self, _channel: &RtpChannel, datagram: Bytes, from: SocketAddr) {
        match RaopPayloadType::of(&datagram) {
            Ok(payload_type) if payload_type.is_audio() => {
                if let Err(e) = self.pipeline.process_audio(&datagram).await {
                    tracing::warn!(from = %from, error = %e, "audio packet dropped");
                }
            }
            Ok(payload_type) => {
                tracing::debug!(from = %from, ?payload_type, "unexpected packet on audio channel");
            }
            Err(e) => tracing::warn!(from = %from, error = %e, "malformed audio datagram"),
        }
    }
}

/// Control channel handler
pub struct ControlHandler {
    pipeline: Arc<AudioPipeline>,
}

impl ControlHandler {
    /// Handler feeding `pipeline`
    #[must_use]
    pub fn new(pipeline: Arc<AudioPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl PacketHandler for ControlHandler {
    async fn on_packet(&self, _channel: &RtpChannel, datagram: Bytes, from: SocketAddr) {
        let result = match RaopPayloadType::of(&datagram) {
            Ok(RaopPayloadType::Sync) => SyncPacket::decode(&datagram)
                .map(|sync| {
                    tracing::trace!(rtp_timestamp = sync.rtp_timestamp, "sync received");
                    self.pipeline.sink().sync(sync.rtp_timestamp, sync.ntp_time);
                })
                .map_err(RaopError::from),
            Ok(RaopPayloadType::RetransmitResponse) => {
                self.pipeline.process_retransmitted(&datagram)
            }
            Ok(payload_type) => {
                tracing::debug!(from = %from, ?payload_type, "unexpected packet on control channel");
                Ok(())
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            tracing::warn!(from = %from, error = %e, "control packet dropped");
        }
    }
}
