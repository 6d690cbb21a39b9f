use crate::audio::{DecodeError, SinkError};
use crate::protocol::crypto::CryptoError;
use crate::protocol::rtp::RtpDecodeError;
use crate::protocol::rtsp::{StatusCode, TransportError};
use crate::protocol::sdp::SdpError;
use std::io;
use thiserror::Error;

/// Errors raised while handling a RAOP session
///
/// Every variant maps to the RTSP status the client receives through
/// [`RaopError::status_code`].
#[derive(Debug, Error)]
pub enum RaopError {
    /// Malformed or unsupported request content
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Method issued in a state that does not accept it
    #[error("{method} not valid in state {state}")]
    InvalidState {
        /// The rejected method
        method: String,
        /// The session state at the time
        state: String,
    },

    /// Method this server does not implement
    #[error("method not implemented: {0}")]
    NotImplemented(String),

    /// Socket bind, connect or I/O failure
    #[error("network error ({context}): {source}")]
    Network {
        /// What was being attempted
        context: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// SDP body rejected
    #[error(transparent)]
    Sdp(#[from] SdpError),

    /// Transport header rejected
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Datagram could not be decoded
    #[error(transparent)]
    Packet(#[from] RtpDecodeError),

    /// Key material rejected
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Decoder rejected the announced format
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Output sink failure
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl RaopError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Wrap an I/O error with what was being attempted
    pub fn network(context: impl Into<String>, source: io::Error) -> Self {
        Self::Network {
            context: context.into(),
            source,
        }
    }

    /// RTSP status returned to the client for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol(_)
            | Self::Sdp(_)
            | Self::Transport(_)
            | Self::Packet(_)
            | Self::Crypto(_)
            | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState { .. } => StatusCode::METHOD_NOT_VALID_IN_STATE,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Network { .. } | Self::Timeout(_) | Self::Sink(_) => StatusCode::INTERNAL_ERROR,
        }
    }

    /// Check if the error was caused by the request rather than the server
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code().0)
    }
}
