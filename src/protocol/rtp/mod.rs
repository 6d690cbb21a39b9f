//! RAOP packet formats carried over the audio, control and timing channels

mod packet;
mod timing;


pub use packet::{
    RaopAudioPacket, RaopPayloadType, RetransmitRequest, RetransmitResponse, RtpDecodeError,
    SyncPacket,
};
pub use timing::{NTP_EPOCH_OFFSET, NtpTimestamp, TimingPacket};

/// RTP protocol constants for RAOP
pub mod constants {
    /// Audio frames per RTP packet (352 samples at 44.1kHz ≈ 8ms)
    pub const FRAMES_PER_PACKET: u32 = 352;

    /// Audio sample rate
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Largest datagram accepted on any channel
    pub const MAX_DATAGRAM_SIZE: usize = 2048;
}
