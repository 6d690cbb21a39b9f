//! SDP (Session Description Protocol) for RAOP
//!
//! RAOP uses SDP in the ANNOUNCE request to describe the audio stream.
//! Only the subset senders actually emit is understood: one `m=audio`
//! line plus the `rtpmap`, `fmtp`, `rsaaeskey`, `aesiv` and
//! `min-latency` attributes. Everything else is validated for line
//! syntax and otherwise ignored.

mod alac;
mod parser;
mod stream;


pub use alac::AlacParameters;
pub use parser::{SdpLine, parse_lines};
pub use stream::StreamDescription;

use super::crypto::CryptoError;
use thiserror::Error;

/// Content type of an ANNOUNCE body
pub const CONTENT_TYPE_SDP: &str = "application/sdp";

/// Encoding name announced for ALAC streams
pub const APPLE_LOSSLESS: &str = "AppleLossless";

/// Errors from parsing or validating an ANNOUNCE body
#[derive(Debug, Error)]
pub enum SdpError {
    /// Line not of the form `<letter>=<value>`
    #[error("cannot parse SDP line {0:?}")]
    InvalidLine(String),

    /// `m=` line that is not `audio <port> RTP/AVP <index>`
    #[error("cannot parse media line {0:?}")]
    InvalidMedia(String),

    /// `a=` line without a name
    #[error("cannot parse attribute {0:?}")]
    InvalidAttribute(String),

    /// `rtpmap` without an index and encoding
    #[error("cannot parse rtpmap entry {0:?}")]
    InvalidRtpmap(String),

    /// `fmtp` without an index
    #[error("cannot parse fmtp entry {0:?}")]
    InvalidFmtp(String),

    /// Media, rtpmap and encoding do not agree on an `AppleLossless` format
    #[error("audio format {0:?} not supported")]
    UnsupportedFormat(Option<u32>),

    /// No `fmtp` line for the announced format
    #[error("audio format {0:?} lacks fmtp line")]
    MissingFmtp(Option<u32>),

    /// `fmtp` line without option tokens
    #[error("audio format {0} incomplete, format options not set")]
    MissingFormatOptions(u32),

    /// Only one of key and IV was announced
    #[error("rsaaeskey and aesiv must be announced together")]
    IncompleteEncryption,

    /// `fmtp` options are not ALAC parameters
    #[error("invalid ALAC parameters: {0}")]
    InvalidAlacParameters(String),

    /// Key unwrap or base64 failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
