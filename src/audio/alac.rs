//! ALAC decoding backed by symphonia

use super::{AudioDecoder, AudioFormat, DecodeError, DecoderFactory};
use crate::protocol::sdp::{AlacParameters, StreamDescription};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_ALAC, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

/// Decoder for RAOP ALAC packets
pub struct AlacDecoder {
    decoder: Box<dyn Decoder>,
    format: AudioFormat,
    frames_per_packet: u64,
    packets: u64,
}

impl AlacDecoder {
    /// Create a decoder from announced ALAC parameters
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::UnsupportedFormat` if symphonia rejects the configuration.
    pub fn new(params: &AlacParameters) -> Result<Self, DecodeError> {
        let mut codec_params = CodecParameters::new();
        codec_params
            .for_codec(CODEC_TYPE_ALAC)
            .with_sample_rate(params.sample_rate)
            .with_bits_per_sample(u32::from(params.bit_depth))
            .with_max_frames_per_packet(u64::from(params.frames_per_packet))
            .with_extra_data(Box::new(params.magic_cookie()));

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        Ok(Self {
            decoder,
            format: AudioFormat::from_alac(params),
            frames_per_packet: u64::from(params.frames_per_packet),
            packets: 0,
        })
    }
}

impl AudioDecoder for AlacDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, DecodeError> {
        let ts = self.packets * self.frames_per_packet;
        self.packets += 1;

        let packet = Packet::new_from_slice(0, ts, self.frames_per_packet, payload);
        let decoded = self
            .decoder
            .decode(&packet)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
        samples.copy_interleaved_ref(decoded);
        Ok(samples.samples().to_vec())
    }
}

/// Factory producing [`AlacDecoder`]s from fmtp options
#[derive(Debug, Clone, Copy, Default)]
pub struct AlacDecoderFactory;

impl DecoderFactory for AlacDecoderFactory {
    fn create(&self, stream: &StreamDescription) -> Result<Box<dyn AudioDecoder>, DecodeError> {
        let params = stream
            .alac_parameters()
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
        Ok(Box::new(AlacDecoder::new(&params)?))
    }
}
