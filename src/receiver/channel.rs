//! UDP channels carrying RAOP audio, control and timing traffic
//!
//! Each [`RtpChannel`] is a bound (and optionally connected) UDP socket.
//! A [`ChannelSet`] owns the channels of one session or proxy peer, runs
//! one receive task per channel and guarantees that every socket is
//! released once [`ChannelSet::close_all`] returns.

use crate::error::RaopError;
use crate::protocol::rtp::constants::MAX_DATAGRAM_SIZE;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Role of a UDP channel within a RAOP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Audio packets from the sender
    Audio,
    /// Sync packets, retransmit requests and responses
    Control,
    /// Timing requests and responses
    Timing,
}

impl ChannelRole {
    /// Every role, in port order
    pub const ALL: [ChannelRole; 3] = [Self::Audio, Self::Control, Self::Timing];

    /// Offset of this role within a port block
    #[must_use]
    pub fn ordinal(self) -> u16 {
        match self {
            Self::Audio => 0,
            Self::Control => 1,
            Self::Timing => 2,
        }
    }

    /// Lowercase role name used in logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Control => "control",
            Self::Timing => "timing",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every datagram arriving on a channel
///
/// Calls for one channel are made sequentially in arrival order.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Handle one datagram received from `from`
    async fn on_packet(&self, channel: &RtpChannel, datagram: Bytes, from: SocketAddr);
}

/// Handler that drops everything it receives
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

#[async_trait]
impl PacketHandler for DiscardHandler {
    async fn on_packet(&self, channel: &RtpChannel, datagram: Bytes, from: SocketAddr) {
        tracing::trace!(role = %channel.role(), from = %from, len = datagram.len(), "datagram discarded");
    }
}

struct ChannelState {
    socket: Option<Arc<UdpSocket>>,
    remote: Option<SocketAddr>,
}

struct ChannelInner {
    role: ChannelRole,
    local_addr: SocketAddr,
    state: Mutex<ChannelState>,
}

/// Handle to a bound UDP channel
///
/// Clones share the socket. Closing any clone closes the channel for all
/// of them; closing twice is a no-op.
#[derive(Clone)]
pub struct RtpChannel {
    inner: Arc<ChannelInner>,
}

impl RtpChannel {
    /// Bind a channel to `local`, connecting it to `remote` when given
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Network` if the bind or connect fails.
    pub async fn bind(
        role: ChannelRole,
        local: SocketAddr,
        remote: Option<SocketAddr>,
    ) -> Result<Self, RaopError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| RaopError::network(format!("bind {role} channel on {local}"), e))?;

        if let Some(remote) = remote {
            socket
                .connect(remote)
                .await
                .map_err(|e| RaopError::network(format!("connect {role} channel to {remote}"), e))?;
        }

        let local_addr = socket
            .local_addr()
            .map_err(|e| RaopError::network(format!("{role} channel address"), e))?;

        Ok(Self {
            inner: Arc::new(ChannelInner {
                role,
                local_addr,
                state: Mutex::new(ChannelState {
                    socket: Some(Arc::new(socket)),
                    remote,
                }),
            }),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, RaopError> {
        self.with_state(|state| state.socket.clone()).ok_or_else(|| {
            RaopError::network(
                format!("{} channel", self.inner.role),
                io::Error::new(io::ErrorKind::NotConnected, "channel closed"),
            )
        })
    }

    /// Role the channel was opened for
    #[must_use]
    pub fn role(&self) -> ChannelRole {
        self.inner.role
    }

    /// Address the socket is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Locally bound port
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.inner.local_addr.port()
    }

    /// Connected remote address, if any
    #[must_use]
    pub fn remote(&self) -> Option<SocketAddr> {
        self.with_state(|state| state.remote)
    }

    /// Whether the reader task is still running
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.with_state(|state| state.socket.is_some())
    }

    /// Connect an already bound channel to `remote`
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Network` if the channel is closed or the connect fails.
    pub async fn connect(&self, remote: SocketAddr) -> Result<(), RaopError> {
        let socket = self.socket()?;
        socket.connect(remote).await.map_err(|e| {
            RaopError::network(format!("connect {} channel to {remote}", self.inner.role), e)
        })?;
        self.with_state(|state| state.remote = Some(remote));
        Ok(())
    }

    /// Send to the connected remote
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Network` if the channel is closed, not connected,
    /// or the send fails.
    pub async fn send(&self, datagram: &[u8]) -> Result<(), RaopError> {
        let socket = self.socket()?;
        if self.remote().is_none() {
            return Err(RaopError::network(
                format!("{} channel", self.inner.role),
                io::Error::new(io::ErrorKind::NotConnected, "no remote address"),
            ));
        }
        socket
            .send(datagram)
            .await
            .map_err(|e| RaopError::network(format!("send on {} channel", self.inner.role), e))?;
        Ok(())
    }

    /// Send to an explicit destination
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Network` if the channel is closed or the send fails.
    pub async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<(), RaopError> {
        let socket = self.socket()?;
        socket.send_to(datagram, target).await.map_err(|e| {
            RaopError::network(format!("send on {} channel to {target}", self.inner.role), e)
        })?;
        Ok(())
    }

    /// Release this handle's reference to the socket
    ///
    /// Returns `false` if the channel was already closed.
    pub fn close(&self) -> bool {
        self.with_state(|state| state.socket.take().is_some())
    }
}

impl fmt::Debug for RtpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpChannel")
            .field("role", &self.inner.role)
            .field("local_addr", &self.inner.local_addr)
            .field("remote", &self.remote())
            .field("open", &self.is_open())
            .finish()
    }
}

struct ChannelEntry {
    channel: RtpChannel,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelEntry {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.channel.close();
        // The task holds the last socket reference; joining releases the port.
        if let Err(e) = self.task.await {
            tracing::warn!(role = %self.channel.role(), error = %e, "RTP receive task failed");
        }
        tracing::debug!(
            role = %self.channel.role(),
            local = %self.channel.local_addr(),
            "RTP channel closed"
        );
    }
}

/// The channels owned by one session or proxy peer
#[derive(Default)]
pub struct ChannelSet {
    entries: Vec<ChannelEntry>,
}

impl ChannelSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a channel for `role` and start delivering its datagrams to `handler`
    ///
    /// An existing channel of the same role is closed first.
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Network` if the socket cannot be bound or connected.
    pub async fn open(
        &mut self,
        role: ChannelRole,
        local: SocketAddr,
        remote: Option<SocketAddr>,
        handler: Arc<dyn PacketHandler>,
    ) -> Result<RtpChannel, RaopError> {
        self.close_role(role).await;

        let channel = RtpChannel::bind(role, local, remote).await?;
        let socket = channel.socket()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            channel.clone(),
            socket,
            handler,
            cancel.clone(),
        ));

        tracing::info!(
            role = %role,
            local = %channel.local_addr(),
            remote = ?remote,
            "RTP channel open"
        );

        self.entries.push(ChannelEntry {
            channel: channel.clone(),
            cancel,
            task,
        });
        Ok(channel)
    }

    /// Channel currently open for `role`
    #[must_use]
    pub fn get(&self, role: ChannelRole) -> Option<&RtpChannel> {
        self.entries
            .iter()
            .map(|entry| &entry.channel)
            .find(|channel| channel.role() == role)
    }

    /// Open channels
    pub fn channels(&self) -> impl Iterator<Item = &RtpChannel> {
        self.entries.iter().map(|entry| &entry.channel)
    }

    /// Number of channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no channel is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close the channel for `role`, if open, and wait for its socket to be released
    pub async fn close_role(&mut self, role: ChannelRole) {
        if let Some(index) = self.entries.iter().position(|e| e.channel.role() == role) {
            self.entries.swap_remove(index).shutdown().await;
        }
    }

    /// Close every channel and wait until all sockets are released
    pub async fn close_all(&mut self) {
        for entry in self.entries.drain(..) {
            entry.shutdown().await;
        }
    }
}

impl Drop for ChannelSet {
    fn drop(&mut self) {
        for entry in &self.entries {
            entry.cancel.cancel();
            entry.channel.close();
        }
    }
}

impl fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.channels()).finish()
    }
}

async fn receive_loop(
    channel: RtpChannel,
    socket: Arc<UdpSocket>,
    handler: Arc<dyn PacketHandler>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    handler.on_packet(&channel, datagram, from).await;
                }
                // ICMP port unreachable from an earlier send on a connected socket
                Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset) => {
                    tracing::trace!(role = %channel.role(), error = %e, "remote port unreachable");
                }
                Err(e) => {
                    tracing::warn!(role = %channel.role(), error = %e, "RTP receive failed");
                    break;
                }
            }
        }
    }
}
