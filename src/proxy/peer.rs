//! One downstream receiver of the proxy
//!
//! A peer owns an RTSP client connection and the UDP channels facing the
//! downstream receiver. Requests are written by the session; a reader task
//! decodes the responses, publishes the last `CSeq` and wires the audio,
//! control and timing channels once the peer answers SETUP.

use super::config::PeerAddress;
use super::fanout::{FanOut, PeerControlHandler, PeerTimingHandler};
use crate::error::RaopError;
use crate::protocol::rtsp::headers::names;
use crate::protocol::rtsp::transport::keys;
use crate::protocol::rtsp::{RtspCodec, RtspRequest, RtspResponse, TransportHeader};
use crate::receiver::channel::{ChannelRole, ChannelSet, DiscardHandler, RtpChannel};
use crate::receiver::config::RtpPorts;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Channels facing one downstream receiver
struct PeerChannels {
    set: tokio::sync::Mutex<ChannelSet>,
    handles: Mutex<[Option<RtpChannel>; 3]>,
    alive: AtomicBool,
}

impl PeerChannels {
    fn handle(&self, role: ChannelRole) -> Option<RtpChannel> {
        lock(&self.handles)[usize::from(role.ordinal())].clone()
    }

    fn store(&self, channel: &RtpChannel) {
        lock(&self.handles)[usize::from(channel.role().ordinal())] = Some(channel.clone());
    }

    async fn close(&self) {
        *lock(&self.handles) = [None, None, None];
        self.set.lock().await.close_all().await;
    }
}

/// A downstream receiver and its connection
pub struct ProxyPeer {
    index: usize,
    address: PeerAddress,
    remote: SocketAddr,
    ports: RtpPorts,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    last_cseq: watch::Receiver<u32>,
    channels: Arc<PeerChannels>,
    reader: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ProxyPeer {
    /// Connect to the peer and start reading its responses
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Timeout` if the connection is not established
    /// within `connect_timeout`, `RaopError::Network` if it is refused.
    pub async fn connect(
        index: usize,
        address: PeerAddress,
        ports: RtpPorts,
        connect_timeout: Duration,
    ) -> Result<Arc<Self>, RaopError> {
        let stream = tokio::time::timeout(
            connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| RaopError::Timeout(format!("connect to peer {address}")))?
        .map_err(|e| RaopError::network(format!("connect to peer {address}"), e))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %address, error = %e, "cannot set TCP_NODELAY");
        }
        let remote = stream
            .peer_addr()
            .map_err(|e| RaopError::network(format!("peer {address} address"), e))?;

        let (read_half, write_half) = stream.into_split();
        let (cseq_tx, cseq_rx) = watch::channel(0);
        let channels = Arc::new(PeerChannels {
            set: tokio::sync::Mutex::new(ChannelSet::new()),
            handles: Mutex::new([None, None, None]),
            alive: AtomicBool::new(true),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_responses(
            read_half,
            address.clone(),
            remote,
            ports,
            channels.clone(),
            cseq_tx,
            cancel.clone(),
        ));

        tracing::info!(peer = %address, index, remote = %remote, "peer connected");

        Ok(Arc::new(Self {
            index,
            address,
            remote,
            ports,
            writer: tokio::sync::Mutex::new(write_half),
            last_cseq: cseq_rx,
            channels,
            reader: Mutex::new(Some((cancel, task))),
        }))
    }

    /// Position in the configured peer list
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Configured downstream address
    #[must_use]
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Resolved address of the peer's RTSP listener
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Local port block of this peer
    #[must_use]
    pub fn ports(&self) -> RtpPorts {
        self.ports
    }

    /// Whether the connection is still usable
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.channels.alive.load(Ordering::Acquire)
    }

    /// `CSeq` of the last response received from the peer
    #[must_use]
    pub fn last_cseq(&self) -> u32 {
        *self.last_cseq.borrow()
    }

    /// Receiver observing the peer's last `CSeq`
    #[must_use]
    pub fn cseq_watch(&self) -> watch::Receiver<u32> {
        self.last_cseq.clone()
    }

    /// Channel facing the peer for `role`, once open
    #[must_use]
    pub fn channel(&self, role: ChannelRole) -> Option<RtpChannel> {
        self.channels.handle(role)
    }

    /// Write a request to the peer
    ///
    /// A failed write marks the peer dead.
    ///
    /// # Errors
    ///
    /// Returns `RaopError::Network` if the write fails.
    pub async fn send(&self, request: &RtspRequest) -> Result<(), RaopError> {
        let bytes = request.encode();
        let mut writer = self.writer.lock().await;

        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            self.channels.alive.store(false, Ordering::Release);
            RaopError::network(format!("send {} to peer {}", request.method, self.address), e)
        })
    }

    /// Forward SETUP with this peer's own control and timing ports
    ///
    /// The control and timing channels are bound before the request goes
    /// out and connected once the peer answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the request has no usable `Transport` header,
    /// a channel cannot be bound or the request cannot be written.
    pub async fn setup(
        &self,
        request: &RtspRequest,
        fanout: Weak<FanOut>,
    ) -> Result<(), RaopError> {
        let value = request
            .headers
            .transport()
            .ok_or_else(|| RaopError::protocol("no Transport header"))?;
        let mut transport = TransportHeader::parse(value)?;

        let bind_ip = unspecified_like(self.remote.ip());
        let (control, timing) = {
            let mut set = self.channels.set.lock().await;
            let control = set
                .open(
                    ChannelRole::Control,
                    SocketAddr::new(bind_ip, self.ports.control),
                    None,
                    Arc::new(PeerControlHandler::new(fanout.clone())),
                )
                .await?;
            let timing = set
                .open(
                    ChannelRole::Timing,
                    SocketAddr::new(bind_ip, self.ports.timing),
                    None,
                    Arc::new(PeerTimingHandler::new(fanout)),
                )
                .await?;
            (control, timing)
        };
        self.channels.store(&control);
        self.channels.store(&timing);

        transport.replace(keys::CONTROL_PORT, control.local_port().to_string());
        transport.replace(keys::TIMING_PORT, timing.local_port().to_string());

        let mut rewritten = request.clone();
        rewritten
            .headers
            .insert(names::TRANSPORT, transport.to_string());

        tracing::debug!(peer = %self.address, transport = %transport, "forwarding SETUP");
        self.send(&rewritten).await
    }

    /// Stop the reader, release every channel and close the connection
    pub async fn close(&self) {
        self.channels.alive.store(false, Ordering::Release);

        let reader = lock(&self.reader).take();
        if let Some((cancel, task)) = reader {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::warn!(peer = %self.address, error = %e, "peer reader failed");
            }
        }

        self.channels.close().await;
        let _ = self.writer.lock().await.shutdown().await;
        tracing::debug!(peer = %self.address, "peer closed");
    }
}

impl std::fmt::Debug for ProxyPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPeer")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("remote", &self.remote)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl Drop for ProxyPeer {
    fn drop(&mut self) {
        if let Some((cancel, _)) = lock(&self.reader).take() {
            cancel.cancel();
        }
    }
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

async fn read_responses(
    mut stream: OwnedReadHalf,
    address: PeerAddress,
    remote: SocketAddr,
    ports: RtpPorts,
    channels: Arc<PeerChannels>,
    cseq_tx: watch::Sender<u32>,
    cancel: CancellationToken,
) {
    let mut codec = RtspCodec::new();
    let mut buf = vec![0u8; 4096];

    let reason = 'read: loop {
        let n = tokio::select! {
            () = cancel.cancelled() => return,
            read = stream.read(&mut buf) => match read {
                Ok(0) => break 'read "connection closed by peer".to_string(),
                Ok(n) => n,
                Err(e) => break 'read e.to_string(),
            },
        };

        if let Err(e) = codec.feed(&buf[..n]) {
            break 'read e.to_string();
        }

        loop {
            match codec.decode() {
                Ok(Some(response)) => {
                    on_response(&response, &address, remote, ports, &channels).await;
                    if let Some(cseq) = response.cseq() {
                        cseq_tx.send_replace(cseq);
                    }
                }
                Ok(None) => break,
                Err(e) => break 'read e.to_string(),
            }
        }
    };

    tracing::warn!(peer = %address, reason = %reason, "peer lost, dropping from fan-out");
    channels.alive.store(false, Ordering::Release);
    channels.close().await;
}

async fn on_response(
    response: &RtspResponse,
    address: &PeerAddress,
    remote: SocketAddr,
    ports: RtpPorts,
    channels: &PeerChannels,
) {
    tracing::debug!(
        peer = %address,
        status = response.status.as_u16(),
        cseq = ?response.cseq(),
        "peer response"
    );

    if !response.is_success() {
        tracing::warn!(peer = %address, status = response.status.as_u16(), "peer rejected request");
        return;
    }
    let Some(value) = response.transport() else {
        return;
    };
    if let Err(e) = connect_channels(value, remote.ip(), ports, channels).await {
        tracing::warn!(peer = %address, error = %e, "cannot connect peer channels");
    }
}

/// Point the peer's channels at the ports it answered SETUP with
async fn connect_channels(
    value: &str,
    peer_ip: IpAddr,
    ports: RtpPorts,
    channels: &PeerChannels,
) -> Result<(), RaopError> {
    let transport = TransportHeader::parse(value)?;

    for (key, role) in [
        (keys::CONTROL_PORT, ChannelRole::Control),
        (keys::TIMING_PORT, ChannelRole::Timing),
    ] {
        if let (Some(port), Some(channel)) = (transport.port(key)?, channels.handle(role)) {
            channel.connect(SocketAddr::new(peer_ip, port)).await?;
        }
    }

    if let Some(port) = transport.port(keys::SERVER_PORT)? {
        let audio = channels
            .set
            .lock()
            .await
            .open(
                ChannelRole::Audio,
                SocketAddr::new(unspecified_like(peer_ip), ports.audio),
                Some(SocketAddr::new(peer_ip, port)),
                Arc::new(DiscardHandler),
            )
            .await?;
        channels.store(&audio);
    }
    Ok(())
}
