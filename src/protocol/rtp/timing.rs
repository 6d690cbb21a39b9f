//! NTP timestamps and RAOP timing packets

use super::packet::{RaopPayloadType, RtpDecodeError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// NTP epoch offset from Unix epoch (seconds from 1900 to 1970)
pub const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// NTP timestamp (64-bit: 32 seconds + 32 fraction)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NtpTimestamp {
    /// Seconds since NTP epoch (Jan 1, 1900)
    pub seconds: u32,
    /// Fractional part of seconds (1/2^32 resolution)
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Create from current system time
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix(since_epoch)
    }

    /// Create from a duration since the Unix epoch
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "NTP era wraps at 32 bits")]
    pub fn from_unix(since_epoch: Duration) -> Self {
        let seconds = since_epoch.as_secs() + NTP_EPOCH_OFFSET;
        let fraction = (u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    /// Create from 64-bit NTP timestamp
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "halves of a u64")]
    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Convert to 64-bit NTP timestamp
    #[must_use]
    pub fn to_u64(&self) -> u64 {
        (u64::from(self.seconds) << 32) | u64::from(self.fraction)
    }

    /// Encode as 8 big-endian bytes
    #[must_use]
    pub fn encode(&self) -> [u8; 8] {
        self.to_u64().to_be_bytes()
    }

    /// Decode from the first 8 bytes of `buf`
    ///
    /// Missing bytes read as zero.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        let n = buf.len().min(8);
        raw[..n].copy_from_slice(&buf[..n]);
        Self::from_u64(u64::from_be_bytes(raw))
    }

    /// Microseconds since the NTP epoch
    #[must_use]
    pub fn to_micros(&self) -> u64 {
        u64::from(self.seconds) * 1_000_000 + ((u64::from(self.fraction) * 1_000_000) >> 32)
    }

    /// Difference `self - other` in microseconds
    #[must_use]
    #[allow(clippy::cast_possible_wrap, reason = "NTP micros fit in i64")]
    pub fn diff_micros(&self, other: &Self) -> i64 {
        self.to_micros() as i64 - other.to_micros() as i64
    }
}

/// RAOP timing packet
///
/// Layout: `0x80, 0xD2|0xD3, seq(2), 0(4), reference(8), receive(8), send(8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPacket {
    /// Request or response
    pub payload_type: RaopPayloadType,
    /// Sequence number
    pub sequence: u16,
    /// Reference time (for a response: the request's send time)
    pub reference_time: NtpTimestamp,
    /// Time the request was received
    pub receive_time: NtpTimestamp,
    /// Time this packet was sent
    pub send_time: NtpTimestamp,
}

impl TimingPacket {
    /// Timing packet size
    pub const SIZE: usize = 32;
    /// Byte offset of the reference time
    pub const REFERENCE_TIME_OFFSET: usize = 8;
    /// Byte offset of the receive time
    pub const RECEIVE_TIME_OFFSET: usize = 16;
    /// Byte offset of the send time
    pub const SEND_TIME_OFFSET: usize = 24;

    /// Create a timing request stamped with `send_time`
    #[must_use]
    pub fn request(sequence: u16, send_time: NtpTimestamp) -> Self {
        Self {
            payload_type: RaopPayloadType::TimingRequest,
            sequence,
            reference_time: NtpTimestamp::default(),
            receive_time: NtpTimestamp::default(),
            send_time,
        }
    }

    /// Create the response to `request`
    ///
    /// The response's reference time is the request's send time; peers match
    /// responses to requests on that identity.
    #[must_use]
    pub fn response_to(
        request: &TimingPacket,
        receive_time: NtpTimestamp,
        send_time: NtpTimestamp,
    ) -> Self {
        Self {
            payload_type: RaopPayloadType::TimingResponse,
            sequence: request.sequence,
            reference_time: request.send_time,
            receive_time,
            send_time,
        }
    }

    /// Encode to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = 0x80;
        buf[1] = 0x80 | self.payload_type as u8;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[8..16].copy_from_slice(&self.reference_time.encode());
        buf[16..24].copy_from_slice(&self.receive_time.encode());
        buf[24..32].copy_from_slice(&self.send_time.encode());
        buf
    }

    /// Decode a timing request or response
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the buffer is too small or is not a timing packet
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        if buf.len() < Self::SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let payload_type = RaopPayloadType::of(buf)?;
        if !matches!(
            payload_type,
            RaopPayloadType::TimingRequest | RaopPayloadType::TimingResponse
        ) {
            return Err(RtpDecodeError::UnexpectedPayloadType(payload_type));
        }

        Ok(Self {
            payload_type,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            reference_time: NtpTimestamp::decode(&buf[8..16]),
            receive_time: NtpTimestamp::decode(&buf[16..24]),
            send_time: NtpTimestamp::decode(&buf[24..32]),
        })
    }

    /// Raw 64-bit field at `offset`, without validating the payload type
    #[must_use]
    pub fn raw_time(datagram: &[u8], offset: usize) -> Option<u64> {
        let bytes: [u8; 8] = datagram.get(offset..offset + 8)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Clock offset (remote - local) in microseconds from a response
    ///
    /// `arrival` is the local time the response arrived.
    /// offset = ((T2 - T1) + (T3 - T4)) / 2
    #[must_use]
    pub fn clock_offset(&self, arrival: NtpTimestamp) -> i64 {
        let t1 = self.reference_time;
        let t2 = self.receive_time;
        let t3 = self.send_time;
        (t2.diff_micros(&t1) + t3.diff_micros(&arrival)) / 2
    }

    /// Round-trip delay in microseconds from a response
    #[must_use]
    pub fn round_trip(&self, arrival: NtpTimestamp) -> i64 {
        arrival.diff_micros(&self.reference_time) - self.send_time.diff_micros(&self.receive_time)
    }
}
