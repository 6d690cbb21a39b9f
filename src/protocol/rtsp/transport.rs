//! RTSP Transport header parsing
//!
//! The Transport header in SETUP requests specifies how audio will be delivered.
//! Format: `RTP/AVP/UDP;unicast;mode=record;control_port=6001;timing_port=6002`
//!
//! Options are kept as an ordered list so that a negotiated response echoes
//! them in the position the sender used, and unknown options survive
//! untouched.

use std::fmt;

/// The only lower transport RAOP speaks
pub const RTP_AVP_UDP: &str = "RTP/AVP/UDP";

/// Well-known Transport option keys
pub mod keys {
    /// Interleaved channel pair, must be `0-1`
    pub const INTERLEAVED: &str = "interleaved";
    /// Stream direction, must be `record`
    pub const MODE: &str = "mode";
    /// Sender's control (sync/retransmit) port
    pub const CONTROL_PORT: &str = "control_port";
    /// Sender's timing port
    pub const TIMING_PORT: &str = "timing_port";
    /// Receiver's audio port, response only
    pub const SERVER_PORT: &str = "server_port";
}

/// Transport header errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// First token is not `RTP/AVP/UDP`
    #[error("unsupported transport protocol: {0}")]
    UnsupportedProtocol(String),

    /// Option token with an empty or invalid key
    #[error("malformed transport option: {0:?}")]
    MalformedOption(String),

    /// Recognized option with a value the receiver does not accept
    #[error("unsupported {key}: {value}")]
    UnsupportedValue {
        /// Option name
        key: String,
        /// Rejected value
        value: String,
    },

    /// Port option whose value is not a port number
    #[error("invalid port for {key}: {value}")]
    InvalidPort {
        /// Option name
        key: String,
        /// Rejected value
        value: String,
    },
}

/// A single `key` or `key=value` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOption {
    /// Option name
    pub key: String,
    /// Option value, absent for flag options such as `unicast`
    pub value: Option<String>,
}

impl TransportOption {
    /// Create an option with a value
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Create a flag option
    pub fn flag(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    fn parse(token: &str) -> Result<Self, TransportError> {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (token, None),
        };

        let valid_key = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid_key {
            return Err(TransportError::MalformedOption(token.to_string()));
        }

        Ok(Self {
            key: key.to_string(),
            value: value.map(ToString::to_string),
        })
    }
}

impl fmt::Display for TransportOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// Parsed Transport header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Protocol token, always [`RTP_AVP_UDP`] once parsed
    pub protocol: String,
    /// Options in wire order
    pub options: Vec<TransportOption>,
}

impl TransportHeader {
    /// Create an empty `RTP/AVP/UDP` header
    #[must_use]
    pub fn new() -> Self {
        Self {
            protocol: RTP_AVP_UDP.to_string(),
            options: Vec::new(),
        }
    }

    /// Parse a Transport header value
    ///
    /// # Errors
    /// Returns `TransportError` if the protocol is not `RTP/AVP/UDP` or an
    /// option token is malformed.
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        // trailing separators carry no option
        let mut parts = value.trim().trim_end_matches(';').split(';');

        let protocol = parts.next().unwrap_or_default().trim();
        if protocol != RTP_AVP_UDP {
            return Err(TransportError::UnsupportedProtocol(protocol.to_string()));
        }

        let options = parts
            .map(|part| TransportOption::parse(part.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            protocol: protocol.to_string(),
            options,
        })
    }

    /// Value of the first option named `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.key == key)
            .and_then(|o| o.value.as_deref())
    }

    /// Port value of the option named `key`
    ///
    /// # Errors
    /// Returns `TransportError::InvalidPort` if the value is not a port number.
    pub fn port(&self, key: &str) -> Result<Option<u16>, TransportError> {
        self.get(key)
            .map(|value| {
                value.parse::<u16>().map_err(|_| TransportError::InvalidPort {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    /// Replace the value of `key` in place, or append it if absent
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.options.iter_mut().find(|o| o.key == key) {
            Some(option) => option.value = Some(value),
            None => self.options.push(TransportOption::new(key, value)),
        }
    }

    /// Replace the value of `key` only if the option is already present
    ///
    /// Returns whether an option was rewritten.
    pub fn replace(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.options.iter_mut().find(|o| o.key == key) {
            Some(option) => {
                option.value = Some(value.into());
                true
            }
            None => false,
        }
    }

    /// Append an option
    pub fn push(&mut self, option: TransportOption) {
        self.options.push(option);
    }
}

impl Default for TransportHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.protocol)?;
        for option in &self.options {
            write!(f, ";{option}")?;
        }
        Ok(())
    }
}
