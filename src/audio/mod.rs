//! Audio decoding and output seams
//!
//! The receiver turns RTP payloads into PCM through an [`AudioDecoder`]
//! and hands the result to an [`AudioSink`]. Both are traits so hosts can
//! plug in their own codec and device.

#[cfg(feature = "alac")]
mod alac;
mod decoder;
pub mod format;
mod sink;
pub mod volume;


#[cfg(feature = "alac")]
pub use alac::{AlacDecoder, AlacDecoderFactory};
pub use decoder::{
    AudioDecoder, DecodeError, DecoderFactory, PcmDecoder, PcmDecoderFactory,
    default_decoder_factory,
};
pub use format::AudioFormat;
pub use sink::{AudioSink, MemorySink, NullSink, SinkError};
pub use volume::GainMapping;
