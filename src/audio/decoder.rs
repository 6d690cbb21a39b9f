use super::AudioFormat;
use crate::protocol::sdp::StreamDescription;
use std::sync::Arc;
use thiserror::Error;

/// Errors from audio decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The announced format cannot be decoded
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// A packet could not be decoded
    #[error("malformed audio packet: {0}")]
    Malformed(String),
}

/// Decoder for the payload of one audio stream
pub trait AudioDecoder: Send {
    /// Authoritative output format of the stream
    fn format(&self) -> AudioFormat;

    /// Decode one (already decrypted) packet payload into interleaved samples
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Malformed` if the payload cannot be decoded.
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, DecodeError>;
}

/// Creates a decoder for each announced stream
pub trait DecoderFactory: Send + Sync {
    /// Build a decoder for the stream's format options
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::UnsupportedFormat` if the options are not understood.
    fn create(&self, stream: &StreamDescription) -> Result<Box<dyn AudioDecoder>, DecodeError>;
}

/// Decoder for uncompressed big-endian 16-bit PCM payloads
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    format: AudioFormat,
}

impl PcmDecoder {
    /// Create a decoder emitting samples in `format`
    #[must_use]
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl AudioDecoder for PcmDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, DecodeError> {
        if payload.len() % 2 != 0 {
            return Err(DecodeError::Malformed(format!(
                "odd PCM payload length {}",
                payload.len()
            )));
        }

        Ok(payload
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .collect())
    }
}

/// Factory producing [`PcmDecoder`]s
///
/// The output format is taken from the fmtp options when they parse as
/// ALAC parameters, otherwise CD quality is assumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmDecoderFactory;

impl DecoderFactory for PcmDecoderFactory {
    fn create(&self, stream: &StreamDescription) -> Result<Box<dyn AudioDecoder>, DecodeError> {
        let format = stream
            .alac_parameters()
            .map(|params| AudioFormat::from_alac(&params))
            .unwrap_or_default();

        if format.bits_per_sample != 16 {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{}-bit PCM",
                format.bits_per_sample
            )));
        }

        Ok(Box::new(PcmDecoder::new(format)))
    }
}

/// Factory used when ALAC support is compiled out
///
/// Every announced stream is `AppleLossless`, so this rejects them all at
/// ANNOUNCE instead of feeding compressed frames to the sink as PCM.
#[cfg(not(feature = "alac"))]
#[derive(Debug, Clone, Copy, Default)]
struct AlacUnavailable;

#[cfg(not(feature = "alac"))]
impl DecoderFactory for AlacUnavailable {
    fn create(&self, _stream: &StreamDescription) -> Result<Box<dyn AudioDecoder>, DecodeError> {
        tracing::warn!("AppleLossless stream announced but the `alac` feature is disabled");
        Err(DecodeError::UnsupportedFormat(
            "AppleLossless (built without the `alac` feature)".to_string(),
        ))
    }
}

/// The decoder factory used when the host does not supply one
///
/// ALAC when the `alac` feature is enabled. Without it every ANNOUNCE is
/// refused with 400; hosts that carry raw PCM in the payload must pass
/// [`PcmDecoderFactory`] explicitly.
#[must_use]
pub fn default_decoder_factory() -> Arc<dyn DecoderFactory> {
    #[cfg(feature = "alac")]
    {
        Arc::new(super::AlacDecoderFactory)
    }

    #[cfg(not(feature = "alac"))]
    {
        Arc::new(AlacUnavailable)
    }
}
