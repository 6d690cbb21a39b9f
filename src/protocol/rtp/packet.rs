//! RAOP-specific RTP packet types

use super::timing::NtpTimestamp;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors decoding a RAOP datagram
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtpDecodeError {
    /// Datagram shorter than the packet type requires
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes the packet type requires
        needed: usize,
        /// Bytes received
        have: usize,
    },

    /// Payload type byte not used by RAOP
    #[error("unknown payload type: 0x{0:02x}")]
    UnknownPayloadType(u8),

    /// Valid RAOP type, but not the one being decoded
    #[error("unexpected payload type: {0:?}")]
    UnexpectedPayloadType(RaopPayloadType),
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<(), RtpDecodeError> {
    if buf.len() < needed {
        return Err(RtpDecodeError::BufferTooSmall {
            needed,
            have: buf.len(),
        });
    }
    Ok(())
}

/// RAOP RTP payload types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RaopPayloadType {
    /// Timing request
    TimingRequest = 0x52,
    /// Timing response
    TimingResponse = 0x53,
    /// Sync packet (sender -> receiver on control channel)
    Sync = 0x54,
    /// Retransmit request (receiver -> sender on control channel)
    RetransmitRequest = 0x55,
    /// Retransmit response carrying a full audio packet
    RetransmitResponse = 0x56,
    /// Audio data (realtime mode)
    AudioRealtime = 0x60,
    /// Audio data (buffered mode)
    AudioBuffered = 0x61,
}

impl RaopPayloadType {
    /// Parse from byte value, ignoring the marker bit
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x7F {
            0x52 => Some(Self::TimingRequest),
            0x53 => Some(Self::TimingResponse),
            0x54 => Some(Self::Sync),
            0x55 => Some(Self::RetransmitRequest),
            0x56 => Some(Self::RetransmitResponse),
            0x60 => Some(Self::AudioRealtime),
            0x61 => Some(Self::AudioBuffered),
            _ => None,
        }
    }

    /// Payload type of a raw datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the datagram is shorter than two bytes or
    /// carries an unknown payload type.
    pub fn of(datagram: &[u8]) -> Result<Self, RtpDecodeError> {
        ensure_len(datagram, 2)?;
        Self::from_byte(datagram[1]).ok_or(RtpDecodeError::UnknownPayloadType(datagram[1] & 0x7F))
    }

    /// Check if this is an audio payload type
    #[must_use]
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::AudioRealtime | Self::AudioBuffered)
    }
}

/// RAOP sync packet (sent on control channel)
///
/// Provides synchronization between RTP timestamps and wall clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPacket {
    /// Extension flag (set on first sync after RECORD/FLUSH)
    pub extension: bool,
    /// Current RTP timestamp being played
    pub rtp_timestamp: u32,
    /// Current NTP time
    pub ntp_time: NtpTimestamp,
    /// RTP timestamp of next audio packet
    pub next_timestamp: u32,
}

impl SyncPacket {
    /// Sync packet size
    pub const SIZE: usize = 20;

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);

        buf.push(0x80 | if self.extension { 0x10 } else { 0x00 });
        buf.push(0xD4);
        buf.extend_from_slice(&0x0007u16.to_be_bytes());
        buf.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ntp_time.encode());
        buf.extend_from_slice(&self.next_timestamp.to_be_bytes());

        buf
    }

    /// Decode from bytes
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if buffer is too small
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        ensure_len(buf, Self::SIZE)?;

        Ok(Self {
            extension: (buf[0] & 0x10) != 0,
            rtp_timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ntp_time: NtpTimestamp::decode(&buf[8..16]),
            next_timestamp: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }
}

/// Retransmit request packet
///
/// Layout: `0x80 0xD5 seq(2) first(2) count(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Sequence number of the request packet itself
    pub sequence: u16,
    /// First sequence number to retransmit
    pub seq_start: u16,
    /// Number of packets to retransmit
    pub count: u16,
}

impl RetransmitRequest {
    /// Packet size
    pub const SIZE: usize = 8;

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = 0x80;
        buf[1] = 0x80 | RaopPayloadType::RetransmitRequest as u8;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..6].copy_from_slice(&self.seq_start.to_be_bytes());
        buf[6..8].copy_from_slice(&self.count.to_be_bytes());
        buf
    }

    /// Decode a full retransmit request datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if buffer is too small or not a retransmit request
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        ensure_len(buf, Self::SIZE)?;
        let payload_type = RaopPayloadType::of(buf)?;
        if payload_type != RaopPayloadType::RetransmitRequest {
            return Err(RtpDecodeError::UnexpectedPayloadType(payload_type));
        }

        Ok(Self {
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            seq_start: u16::from_be_bytes([buf[4], buf[5]]),
            count: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    /// Requested sequence numbers, wrapping at 16 bits
    pub fn sequences(&self) -> impl Iterator<Item = u16> {
        let start = self.seq_start;
        (0..self.count).map(move |i| start.wrapping_add(i))
    }
}

/// Retransmit response: a 4-byte header followed by a complete audio packet
pub struct RetransmitResponse;

impl RetransmitResponse {
    /// Header size preceding the embedded audio packet
    pub const HEADER_SIZE: usize = 4;

    /// Wrap an audio packet for retransmission
    #[must_use]
    pub fn encode(sequence: u16, audio_packet: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + audio_packet.len());
        buf.put_u8(0x80);
        buf.put_u8(0x80 | RaopPayloadType::RetransmitResponse as u8);
        buf.put_u16(sequence);
        buf.put_slice(audio_packet);
        buf.freeze()
    }

    /// Extract the embedded audio packet
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the datagram cannot hold an audio header
    pub fn audio_packet(datagram: &[u8]) -> Result<&[u8], RtpDecodeError> {
        ensure_len(
            datagram,
            Self::HEADER_SIZE + RaopAudioPacket::HEADER_SIZE,
        )?;
        Ok(&datagram[Self::HEADER_SIZE..])
    }
}

/// RAOP audio packet with header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaopAudioPacket {
    /// Marker bit (set on first packet after RECORD/FLUSH)
    pub marker: bool,
    /// Realtime or buffered audio
    pub payload_type: RaopPayloadType,
    /// Sequence number
    pub sequence: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// SSRC
    pub ssrc: u32,
    /// Audio payload (possibly encrypted)
    pub payload: Bytes,
}

impl RaopAudioPacket {
    /// RTP header size
    pub const HEADER_SIZE: usize = 12;

    /// Create a new realtime audio packet
    #[must_use]
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            marker: false,
            payload_type: RaopPayloadType::AudioRealtime,
            sequence,
            timestamp,
            ssrc,
            payload: payload.into(),
        }
    }

    /// Set marker bit (first packet after RECORD/FLUSH)
    #[must_use]
    pub fn with_marker(mut self) -> Self {
        self.marker = true;
        self
    }

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());

        buf.put_u8(0x80);
        buf.put_u8(self.payload_type as u8 | if self.marker { 0x80 } else { 0x00 });
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);

        buf.freeze()
    }

    /// Sequence number of a raw audio datagram without decoding the rest
    #[must_use]
    pub fn peek_sequence(datagram: &[u8]) -> Option<u16> {
        (datagram.len() >= Self::HEADER_SIZE)
            .then(|| u16::from_be_bytes([datagram[2], datagram[3]]))
    }

    /// Decode from bytes
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if buffer is too small or is not an audio packet
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        ensure_len(buf, Self::HEADER_SIZE)?;
        let payload_type = RaopPayloadType::of(buf)?;
        if !payload_type.is_audio() {
            return Err(RtpDecodeError::UnexpectedPayloadType(payload_type));
        }

        Ok(Self {
            marker: (buf[1] & 0x80) != 0,
            payload_type,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload: Bytes::copy_from_slice(&buf[Self::HEADER_SIZE..]),
        })
    }
}
