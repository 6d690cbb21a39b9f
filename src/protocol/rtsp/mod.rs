//! Sans-IO RTSP protocol implementation for RAOP
//!
//! Both directions are covered: [`RtspServerCodec`] parses requests arriving
//! from a sender and [`RtspCodec`] parses responses coming back from a
//! downstream receiver when the proxy acts as a client.

pub mod codec;
pub mod headers;
pub mod request;
pub mod response;
pub mod server_codec;
pub mod transport;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

pub use codec::{RtspCodec, RtspCodecError};
pub use headers::Headers;
pub use request::{RtspRequest, RtspRequestBuilder};
pub use response::{RtspResponse, StatusCode};
pub use server_codec::{ParseError, ResponseBuilder, RtspServerCodec, encode_response};
pub use transport::{TransportError, TransportHeader, TransportOption};

/// RTSP methods used by RAOP senders
///
/// Methods outside the RAOP vocabulary are kept verbatim in
/// [`Method::Other`] so they can be answered with `501 Not Implemented`
/// instead of failing the whole connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Capability query
    Options,
    /// Announce stream information (SDP)
    Announce,
    /// Set up transport
    Setup,
    /// Start streaming
    Record,
    /// Pause streaming
    Pause,
    /// Flush buffered audio
    Flush,
    /// Tear down session
    Teardown,
    /// Set parameter (volume)
    SetParameter,
    /// Get parameter (volume)
    GetParameter,
    /// Any other method token
    Other(String),
}

impl Method {
    /// Convert to RTSP method string
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Record => "RECORD",
            Method::Pause => "PAUSE",
            Method::Flush => "FLUSH",
            Method::Teardown => "TEARDOWN",
            Method::SetParameter => "SET_PARAMETER",
            Method::GetParameter => "GET_PARAMETER",
            Method::Other(name) => name,
        }
    }

    /// Methods listed in the `Public` header of an OPTIONS response
    pub const PUBLIC: &'static str =
        "ANNOUNCE, SETUP, RECORD, PAUSE, FLUSH, TEARDOWN, OPTIONS, GET_PARAMETER, SET_PARAMETER";
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty()
            || !s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(());
        }

        Ok(match s.to_ascii_uppercase().as_str() {
            "OPTIONS" => Method::Options,
            "ANNOUNCE" => Method::Announce,
            "SETUP" => Method::Setup,
            "RECORD" => Method::Record,
            "PAUSE" => Method::Pause,
            "FLUSH" => Method::Flush,
            "TEARDOWN" => Method::Teardown,
            "SET_PARAMETER" => Method::SetParameter,
            "GET_PARAMETER" => Method::GetParameter,
            _ => Method::Other(s.to_string()),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
