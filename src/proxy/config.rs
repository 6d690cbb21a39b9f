//! Proxy configuration

use crate::protocol::crypto::{CryptoError, RaopRsaPrivateKey};
use crate::receiver::config::RtpPorts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Well-known RTSP port of the proxy
pub const DEFAULT_PROXY_PORT: u16 = 46344;

/// First upstream-facing RTP port
pub const DEFAULT_LOCAL_RTP_BASE: u16 = 56400;

/// First port of the per-peer port blocks
pub const DEFAULT_PEER_PORT_BASE: u16 = 56500;

/// Ports reserved per peer: audio, control, timing and one spare
pub const PEER_PORT_BLOCK: u16 = 4;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Peer not written as `host:port`
    #[error("invalid peer address {0:?}, expected host:port")]
    InvalidPeerAddress(String),
}

/// A downstream receiver written as `host:port`
///
/// IPv6 hosts may be bracketed (`[::1]:5000`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    /// Host name or IP address
    pub host: String,
    /// RTSP port
    pub port: u16,
}

impl PeerAddress {
    /// Peer at `host:port`
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, splitting on the last `:`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPeerAddress` if the host is empty or the
    /// port is not a non-zero 16-bit number.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPeerAddress(value.to_string());

        let (host, port) = value.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port: u16 = port.parse().map_err(|_| invalid())?;

        if host.is_empty() || port == 0 {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }

    /// Host as an IP address, if it is one
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Check whether this address names a listener on this host at `port`
    ///
    /// `local_ips` are the host's own addresses; loopback, unspecified and
    /// `localhost` always count as local.
    #[must_use]
    pub fn is_local(&self, port: u16, local_ips: &[IpAddr]) -> bool {
        if self.port != port {
            return false;
        }
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.ip().is_some_and(|ip| {
            ip.is_loopback() || ip.is_unspecified() || local_ips.contains(&ip)
        })
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.to_string()
    }
}

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Name advertised to senders
    pub name: String,

    /// RTSP listen port (0 = auto-assign)
    pub port: u16,

    /// Address the RTSP listener binds to
    pub bind_address: IpAddr,

    /// First upstream-facing RTP port (0 = OS-assigned)
    pub local_rtp_base: u16,

    /// First port of the per-peer blocks (0 = OS-assigned)
    pub peer_port_base: u16,

    /// Bound on the wait for every peer to answer a forwarded request
    pub barrier_timeout: Duration,

    /// Bound on connecting to a peer
    pub connect_timeout: Duration,

    /// Lifetime of an unanswered timing request routing entry
    pub timing_key_ttl: Duration,

    /// Upstream audio packets kept for answering retransmit requests
    pub history_capacity: usize,

    /// Downstream receivers
    pub peers: Vec<PeerAddress>,

    /// PEM file holding the RSA key used for `Apple-Challenge`
    pub private_key_path: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name: "AirAudio Proxy".to_string(),
            port: DEFAULT_PROXY_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_rtp_base: DEFAULT_LOCAL_RTP_BASE,
            peer_port_base: DEFAULT_PEER_PORT_BASE,
            barrier_timeout: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(3000),
            timing_key_ttl: Duration::from_secs(10),
            history_capacity: 512,
            peers: Vec::new(),
            private_key_path: None,
        }
    }
}

impl ProxyConfig {
    /// Create with custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the RTSP listen port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the address to listen on
    #[must_use]
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the upstream and peer port bases
    #[must_use]
    pub fn port_bases(mut self, local_rtp_base: u16, peer_port_base: u16) -> Self {
        self.local_rtp_base = local_rtp_base;
        self.peer_port_base = peer_port_base;
        self
    }

    /// Set how long a forwarded request waits for every peer
    #[must_use]
    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    /// Set the TCP connect timeout for peers
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long a relayed timing request can be answered
    #[must_use]
    pub fn timing_key_ttl(mut self, ttl: Duration) -> Self {
        self.timing_key_ttl = ttl;
        self
    }

    /// Set how many audio packets are kept for retransmits
    #[must_use]
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Add a downstream receiver
    #[must_use]
    pub fn peer(mut self, address: PeerAddress) -> Self {
        self.peers.push(address);
        self
    }

    /// Load the RSA key used for `Apple-Challenge` from `path`
    #[must_use]
    pub fn private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Upstream-facing RTP ports
    #[must_use]
    pub fn local_ports(&self) -> RtpPorts {
        RtpPorts::from_first(self.local_rtp_base)
    }

    /// RTP ports of the peer at `index`
    ///
    /// The block starts at `peer_port_base + 4 * index`; its first port is
    /// kept spare and the roles follow in order.
    #[must_use]
    pub fn peer_ports(&self, index: usize) -> RtpPorts {
        if self.peer_port_base == 0 {
            return RtpPorts::ephemeral();
        }
        let offset = u16::try_from(index)
            .unwrap_or(u16::MAX)
            .saturating_mul(PEER_PORT_BLOCK);
        RtpPorts::from_first(self.peer_port_base.saturating_add(offset).saturating_add(1))
    }

    /// Drop peers that point back at this proxy's own listener
    pub fn remove_self_peers(&mut self, local_ips: &[IpAddr]) {
        let port = self.port;
        self.peers.retain(|peer| {
            let local = peer.is_local(port, local_ips);
            if local {
                tracing::warn!(peer = %peer, "ignoring peer that points at this proxy");
            }
            !local
        });
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
