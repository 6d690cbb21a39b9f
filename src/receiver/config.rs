//! Player configuration

use super::channel::ChannelRole;
use crate::protocol::crypto::{CryptoError, RaopRsaPrivateKey};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Well-known RTSP port of the player
pub const DEFAULT_RTSP_PORT: u16 = 46343;

/// First well-known RTP port of the player
pub const DEFAULT_RTP_PORT_FIRST: u16 = 56300;

/// Interval between timing requests sent to the client while recording
pub const DEFAULT_TIMING_INTERVAL: Duration = Duration::from_secs(3);

/// Local UDP ports per channel role (0 = OS-assigned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpPorts {
    /// Audio data port
    pub audio: u16,
    /// Control (sync and retransmit) port
    pub control: u16,
    /// Timing port
    pub timing: u16,
}

impl RtpPorts {
    /// Explicit ports for every role
    #[must_use]
    pub const fn new(audio: u16, control: u16, timing: u16) -> Self {
        Self {
            audio,
            control,
            timing,
        }
    }

    /// Let the OS pick every port
    #[must_use]
    pub const fn ephemeral() -> Self {
        Self::new(0, 0, 0)
    }

    /// Consecutive ports starting at `first`, in role order
    ///
    /// A `first` of 0 yields OS-assigned ports.
    #[must_use]
    pub const fn from_first(first: u16) -> Self {
        if first == 0 {
            return Self::ephemeral();
        }
        Self::new(first, first.saturating_add(1), first.saturating_add(2))
    }

    /// Port configured for `role`
    #[must_use]
    pub fn port(&self, role: ChannelRole) -> u16 {
        match role {
            ChannelRole::Audio => self.audio,
            ChannelRole::Control => self.control,
            ChannelRole::Timing => self.timing,
        }
    }
}

impl Default for RtpPorts {
    fn default() -> Self {
        Self::from_first(DEFAULT_RTP_PORT_FIRST)
    }
}

/// Player configuration
///
/// The device gain range is not configured here; it comes from the
/// [`AudioSink`](crate::audio::AudioSink) the player drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Name advertised to senders
    pub name: String,

    /// RTSP listen port (0 = auto-assign)
    pub port: u16,

    /// Address the RTSP listener binds to
    pub bind_address: IpAddr,

    /// Local RTP ports
    pub rtp_ports: RtpPorts,

    /// PEM file holding the RSA key used for `Apple-Challenge` and
    /// encrypted streams
    pub private_key_path: Option<PathBuf>,

    /// Interval between timing requests while recording
    pub timing_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            name: "AirAudio".to_string(),
            port: DEFAULT_RTSP_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rtp_ports: RtpPorts::default(),
            private_key_path: None,
            timing_interval: DEFAULT_TIMING_INTERVAL,
        }
    }
}

impl ReceiverConfig {
    /// Create with custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set bind address
    #[must_use]
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set RTP ports
    #[must_use]
    pub fn rtp_ports(mut self, ports: RtpPorts) -> Self {
        self.rtp_ports = ports;
        self
    }

    /// Set private key file
    #[must_use]
    pub fn private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set timing request interval
    #[must_use]
    pub fn timing_interval(mut self, interval: Duration) -> Self {
        self.timing_interval = interval;
        self
    }

    /// Load the configured private key, if any
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` if the file cannot be read or parsed.
    pub fn load_private_key(&self) -> Result<Option<RaopRsaPrivateKey>, CryptoError> {
        self.private_key_path
            .as_ref()
            .map(RaopRsaPrivateKey::from_pem_file)
            .transpose()
    }
}
