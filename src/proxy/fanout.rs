//! Data plane of the proxy
//!
//! [`FanOut`] holds the live peers of one proxy session together with the
//! upstream control and timing channels. Upstream audio and control
//! datagrams are replicated to every peer; datagrams from peers travel
//! back upstream, except timing responses, which are routed to the single
//! peer whose request they answer, and retransmit requests, which are
//! served from the packet history when possible.

use super::barrier::{BarrierOutcome, wait_for_cseq};
use super::history::PacketHistory;
use super::peer::ProxyPeer;
use super::timing_router::TimingKeyTable;
use crate::protocol::rtp::{
    NtpTimestamp, RaopPayloadType, RetransmitRequest, RetransmitResponse, TimingPacket,
};
use crate::protocol::rtsp::RtspRequest;
use crate::receiver::channel::{ChannelRole, PacketHandler, RtpChannel};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Peers and shared packet state of one proxy session
pub struct FanOut {
    peers: RwLock<Vec<Arc<ProxyPeer>>>,
    history: Mutex<PacketHistory>,
    timing_keys: Mutex<TimingKeyTable<RtpChannel>>,
    upstream_control: Mutex<Option<RtpChannel>>,
    upstream_timing: Mutex<Option<RtpChannel>>,
}

impl FanOut {
    /// Create an empty fan-out keeping `history_capacity` audio packets
    #[must_use]
    pub fn new(history_capacity: usize, timing_key_ttl: Duration) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            history: Mutex::new(PacketHistory::new(history_capacity)),
            timing_keys: Mutex::new(TimingKeyTable::new(timing_key_ttl)),
            upstream_control: Mutex::new(None),
            upstream_timing: Mutex::new(None),
        }
    }

    /// Replace the peer list
    pub fn set_peers(&self, peers: Vec<Arc<ProxyPeer>>) {
        *self.peers.write().unwrap_or_else(PoisonError::into_inner) = peers;
    }

    /// Live peers; dead ones are dropped from the list
    pub fn peers(&self) -> Vec<Arc<ProxyPeer>> {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.retain(|peer| {
            if !peer.is_alive() {
                tracing::warn!(peer = %peer.address(), "peer dropped from fan-out");
            }
            peer.is_alive()
        });
        peers.clone()
    }

    /// Number of peers currently in the list, dead or alive
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Close and forget every peer
    pub async fn close_peers(&self) {
        let peers =
            std::mem::take(&mut *self.peers.write().unwrap_or_else(PoisonError::into_inner));
        join_all(peers.iter().map(|peer| peer.close())).await;
    }

    /// Set the channels that carry peer traffic back to the sender
    pub fn set_upstream(&self, control: Option<RtpChannel>, timing: Option<RtpChannel>) {
        *lock(&self.upstream_control) = control;
        *lock(&self.upstream_timing) = timing;
    }

    /// Forget upstream channels and every packet-level record
    pub fn clear(&self) {
        self.set_upstream(None, None);
        lock(&self.history).clear();
        lock(&self.timing_keys).clear();
    }

    /// Write `request` to every live peer
    pub async fn forward(&self, request: &RtspRequest) {
        let peers = self.peers();
        let results = join_all(peers.iter().map(|peer| peer.send(request))).await;
        for (peer, result) in peers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(peer = %peer.address(), error = %e, "cannot forward request");
            }
        }
    }

    /// Wait until every live peer has answered `cseq`, for at most `limit`
    pub async fn barrier(&self, cseq: u32, limit: Duration) -> BarrierOutcome {
        let mut watchers: Vec<_> = self.peers().iter().map(|peer| peer.cseq_watch()).collect();
        let outcome = wait_for_cseq(&mut watchers, cseq, limit).await;
        if let BarrierOutcome::TimedOut { pending } = outcome {
            tracing::warn!(cseq, pending, "peers did not answer in time, continuing");
        }
        outcome
    }

    /// Remember an upstream audio datagram for retransmission
    pub fn record(&self, datagram: Bytes) {
        lock(&self.history).record(datagram);
    }

    /// Audio packets available for retransmission
    #[must_use]
    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    /// Copy a datagram to the `role` channel of every connected peer
    pub async fn broadcast(&self, role: ChannelRole, datagram: &[u8]) {
        let channels: Vec<RtpChannel> = self
            .peers()
            .iter()
            .filter_map(|peer| peer.channel(role))
            .filter(|channel| channel.remote().is_some())
            .collect();

        for channel in channels {
            if let Err(e) = channel.send(datagram).await {
                tracing::trace!(role = %role, error = %e, "datagram not replicated");
            }
        }
    }

    /// Relay a datagram from a peer to the sender
    pub async fn send_upstream(&self, role: ChannelRole, datagram: &[u8]) {
        let channel = match role {
            ChannelRole::Control => lock(&self.upstream_control).clone(),
            ChannelRole::Timing => lock(&self.upstream_timing).clone(),
            ChannelRole::Audio => None,
        };
        let Some(channel) = channel else {
            tracing::trace!(role = %role, "no upstream channel, datagram dropped");
            return;
        };
        if let Err(e) = channel.send(datagram).await {
            tracing::debug!(role = %role, error = %e, "datagram not relayed upstream");
        }
    }

    /// Record which peer channel sent the timing request stamped `key`
    pub fn observe_timing_request(&self, key: u64, channel: RtpChannel) {
        lock(&self.timing_keys).observe(key, channel);
    }

    /// Peer channel waiting for the response that references `key`
    pub fn resolve_timing_response(&self, key: u64) -> Option<RtpChannel> {
        lock(&self.timing_keys).resolve(key)
    }

    /// Relayed timing requests still awaiting a response
    #[must_use]
    pub fn pending_timing_requests(&self) -> usize {
        lock(&self.timing_keys).len()
    }

    fn retransmissions(&self, request: &RetransmitRequest) -> Option<Vec<Bytes>> {
        lock(&self.history).retransmissions(request)
    }
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("peers", &self.peer_count())
            .field("history", &self.history_len())
            .finish_non_exhaustive()
    }
}

/// Audio from the sender
pub struct UpstreamAudioHandler {
    fanout: Arc<FanOut>,
}

impl UpstreamAudioHandler {
    /// Handler relaying through `fanout`
    #[must_use]
    pub fn new(fanout: Arc<FanOut>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl PacketHandler for UpstreamAudioHandler {
    async fn on_packet(&self, _channel: &RtpChannel, datagram: Bytes, _from: SocketAddr) {
        self.fanout.record(datagram.clone());
        self.fanout.broadcast(ChannelRole::Audio, &datagram).await;
    }
}

/// Sync packets and retransmitted audio from the sender
pub struct UpstreamControlHandler {
    fanout: Arc<FanOut>,
}

impl UpstreamControlHandler {
    /// Handler relaying through `fanout`
    #[must_use]
    pub fn new(fanout: Arc<FanOut>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl PacketHandler for UpstreamControlHandler {
    async fn on_packet(&self, _channel: &RtpChannel, datagram: Bytes, _from: SocketAddr) {
        if RaopPayloadType::of(&datagram) == Ok(RaopPayloadType::RetransmitResponse) {
            if let Ok(audio) = RetransmitResponse::audio_packet(&datagram) {
                self.fanout.record(Bytes::copy_from_slice(audio));
            }
        }
        self.fanout.broadcast(ChannelRole::Control, &datagram).await;
    }
}

/// Timing traffic from the sender
///
/// Responses go to the peer whose request they reference; requests are
/// answered locally.
pub struct UpstreamTimingHandler {
    fanout: Arc<FanOut>,
}

impl UpstreamTimingHandler {
    /// Handler relaying through `fanout`
    #[must_use]
    pub fn new(fanout: Arc<FanOut>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl PacketHandler for UpstreamTimingHandler {
    async fn on_packet(&self, channel: &RtpChannel, datagram: Bytes, from: SocketAddr) {
        match RaopPayloadType::of(&datagram) {
            Ok(RaopPayloadType::TimingResponse) => {
                let Some(key) =
                    TimingPacket::raw_time(&datagram, TimingPacket::REFERENCE_TIME_OFFSET)
                else {
                    return;
                };
                let Some(peer_channel) = self.fanout.resolve_timing_response(key) else {
                    tracing::debug!(key, "timing response matches no pending request");
                    return;
                };
                if let Err(e) = peer_channel.send(&datagram).await {
                    tracing::debug!(error = %e, "timing response not routed");
                }
            }
            Ok(RaopPayloadType::TimingRequest) => {
                let arrival = NtpTimestamp::now();
                if let Ok(request) = TimingPacket::decode(&datagram) {
                    let response =
                        TimingPacket::response_to(&request, arrival, NtpTimestamp::now());
                    if let Err(e) = channel.send_to(&response.encode(), from).await {
                        tracing::debug!(to = %from, error = %e, "timing response not sent");
                    }
                }
            }
            _ => tracing::debug!(from = %from, "ignoring datagram on timing channel"),
        }
    }
}

/// Control traffic from a peer
pub struct PeerControlHandler {
    fanout: Weak<FanOut>,
}

impl PeerControlHandler {
    /// Handler relaying through `fanout`
    #[must_use]
    pub fn new(fanout: Weak<FanOut>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl PacketHandler for PeerControlHandler {
    async fn on_packet(&self, channel: &RtpChannel, datagram: Bytes, _from: SocketAddr) {
        let Some(fanout) = self.fanout.upgrade() else {
            return;
        };

        if let Ok(request) = RetransmitRequest::decode(&datagram) {
            if let Some(responses) = fanout.retransmissions(&request) {
                tracing::debug!(
                    start = request.seq_start,
                    count = request.count,
                    "serving retransmit from history"
                );
                for response in responses {
                    if let Err(e) = channel.send(&response).await {
                        tracing::debug!(error = %e, "retransmission not sent");
                    }
                }
                return;
            }
        }

        fanout.send_upstream(ChannelRole::Control, &datagram).await;
    }
}

/// Timing traffic from a peer
///
/// Requests are remembered by send time so the sender's response can be
/// routed back to this channel.
pub struct PeerTimingHandler {
    fanout: Weak<FanOut>,
}

impl PeerTimingHandler {
    /// Handler relaying through `fanout`
    #[must_use]
    pub fn new(fanout: Weak<FanOut>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl PacketHandler for PeerTimingHandler {
    async fn on_packet(&self, channel: &RtpChannel, datagram: Bytes, _from: SocketAddr) {
        let Some(fanout) = self.fanout.upgrade() else {
            return;
        };

        if RaopPayloadType::of(&datagram) == Ok(RaopPayloadType::TimingRequest) {
            if let Some(key) = TimingPacket::raw_time(&datagram, TimingPacket::SEND_TIME_OFFSET) {
                fanout.observe_timing_request(key, channel.clone());
            }
        }

        fanout.send_upstream(ChannelRole::Timing, &datagram).await;
    }
}
