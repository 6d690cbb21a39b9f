//! Proxy session: answers the sender locally and replicates to every peer

use super::config::ProxyConfig;
use super::fanout::{FanOut, UpstreamAudioHandler, UpstreamControlHandler, UpstreamTimingHandler};
use super::peer::ProxyPeer;
use crate::error::RaopError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::rtsp::headers::names;
use crate::protocol::rtsp::{Method, ResponseBuilder, RtspRequest};
use crate::protocol::sdp::StreamDescription;
use crate::receiver::channel::{ChannelRole, ChannelSet, PacketHandler};
use crate::receiver::config::RtpPorts;
use crate::receiver::connection::{ConnectionContext, RtspHandler};
use crate::receiver::events::{EventSender, ServerEvent, emit, event_channel};
use crate::receiver::negotiate::{ChannelOpener, negotiate_transport};
use crate::receiver::parameters::{CONTENT_TYPE_PARAMETERS, VOLUME, parse_parameters, volume_body};
use crate::receiver::session::{SESSION_ID, SessionState, expect_state, require_sdp};
use crate::server::{HandlerFactory, RtspServer};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

/// Resources shared by every proxy session of one server
#[derive(Debug)]
pub struct ProxyContext {
    /// Proxy configuration, self-pointing peers removed
    pub config: ProxyConfig,
    /// Event channel of the owning server
    pub events: EventSender,
}

/// State machine of one sender connection to the proxy
pub struct ProxySession {
    ctx: Arc<ProxyContext>,
    client: SocketAddr,
    local: SocketAddr,
    state: SessionState,
    channels: ChannelSet,
    fanout: Arc<FanOut>,
    volume: Option<String>,
}

impl ProxySession {
    /// Session for the sender at `client`, accepted on `local`
    #[must_use]
    pub fn new(ctx: Arc<ProxyContext>, client: SocketAddr, local: SocketAddr) -> Self {
        let fanout = Arc::new(FanOut::new(
            ctx.config.history_capacity,
            ctx.config.timing_key_ttl,
        ));
        Self {
            ctx,
            client,
            local,
            state: SessionState::Idle,
            channels: ChannelSet::new(),
            fanout,
            volume: None,
        }
    }

    /// Current protocol state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Peers and data-plane relay of this session
    #[must_use]
    pub fn fanout(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    /// Upstream-facing channels
    #[must_use]
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Close every peer, then the upstream channels
    pub async fn reset(&mut self) {
        self.fanout.close_peers().await;
        self.fanout.clear();
        self.channels.close_all().await;
        self.volume = None;
        self.state = SessionState::Idle;
    }

    async fn connect_peers(&self) -> Vec<Arc<ProxyPeer>> {
        let config = &self.ctx.config;
        let attempts = config.peers.iter().enumerate().map(|(index, address)| {
            ProxyPeer::connect(
                index,
                address.clone(),
                config.peer_ports(index),
                config.connect_timeout,
            )
        });

        join_all(attempts)
            .await
            .into_iter()
            .zip(&config.peers)
            .filter_map(|(result, address)| match result {
                Ok(peer) => Some(peer),
                Err(e) => {
                    tracing::warn!(peer = %address, error = %e, "peer unreachable, skipping");
                    None
                }
            })
            .collect()
    }

    /// Send `request` to every live peer and wait for their answers
    async fn replicate(&self, request: &RtspRequest) {
        self.fanout.forward(request).await;
        self.await_peers(request).await;
    }

    async fn await_peers(&self, request: &RtspRequest) {
        if let Some(cseq) = request.cseq() {
            self.fanout
                .barrier(cseq, self.ctx.config.barrier_timeout)
                .await;
        }
    }

    async fn announce(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        require_sdp(request)?;
        let format_index = StreamDescription::validate(&request.body_text())?;

        self.reset().await;

        let peers = self.connect_peers().await;
        tracing::info!(
            client = %self.client,
            format_index,
            peers = peers.len(),
            configured = self.ctx.config.peers.len(),
            "stream announced to proxy"
        );
        self.fanout.set_peers(peers);
        self.replicate(request).await;

        emit(
            &self.ctx.events,
            ServerEvent::StreamAnnounced {
                address: self.client,
                encrypted: request.body_text().contains("a=rsaaeskey:"),
            },
        );
        self.state = SessionState::Announced;
        Ok(ResponseBuilder::ok())
    }

    async fn setup(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(&request.method, self.state, &[SessionState::Announced])?;

        let transport = request
            .headers
            .transport()
            .ok_or_else(|| RaopError::protocol("no Transport header"))?;

        let result = {
            let mut opener = UpstreamChannels {
                channels: &mut self.channels,
                bind_ip: self.local.ip(),
                ports: self.ctx.config.local_ports(),
                fanout: self.fanout.clone(),
            };
            negotiate_transport(transport, self.client.ip(), &mut opener).await
        };
        let negotiated = match result {
            Ok(negotiated) => negotiated,
            Err(e) => {
                self.channels.close_all().await;
                return Err(e);
            }
        };

        self.fanout.set_upstream(
            self.channels.get(ChannelRole::Control).cloned(),
            self.channels.get(ChannelRole::Timing).cloned(),
        );

        let peers = self.fanout.peers();
        let fanout = Arc::downgrade(&self.fanout);
        let results = join_all(peers.iter().map(|peer| peer.setup(request, fanout.clone()))).await;
        let mut failed = Vec::new();
        for (peer, result) in peers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(peer = %peer.address(), error = %e, "peer SETUP failed, dropping peer");
                failed.push(peer.clone());
            }
        }
        join_all(failed.iter().map(|peer| peer.close())).await;
        self.await_peers(request).await;

        self.state = SessionState::SetUp;
        tracing::info!(client = %self.client, transport = %negotiated, "proxy transport negotiated");
        Ok(ResponseBuilder::ok()
            .header(names::TRANSPORT, &negotiated.to_string())
            .session(SESSION_ID))
    }

    async fn record(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(
            &request.method,
            self.state,
            &[
                SessionState::SetUp,
                SessionState::Recording,
                SessionState::Flushed,
            ],
        )?;
        self.replicate(request).await;

        if self.state != SessionState::Recording {
            tracing::info!(client = %self.client, "sender started streaming through proxy");
            emit(
                &self.ctx.events,
                ServerEvent::RecordingStarted {
                    address: self.client,
                },
            );
        }
        self.state = SessionState::Recording;
        Ok(ResponseBuilder::ok())
    }

    async fn flush(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(
            &request.method,
            self.state,
            &[SessionState::Recording, SessionState::Flushed],
        )?;
        self.replicate(request).await;

        self.state = SessionState::Flushed;
        emit(
            &self.ctx.events,
            ServerEvent::Flushed {
                address: self.client,
            },
        );
        Ok(ResponseBuilder::ok())
    }

    async fn set_parameter(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(
            &request.method,
            self.state,
            &[
                SessionState::SetUp,
                SessionState::Recording,
                SessionState::Flushed,
            ],
        )?;

        let is_text = request
            .headers
            .content_type()
            .is_none_or(|content_type| content_type == CONTENT_TYPE_PARAMETERS);
        if is_text {
            let body = request.body_text();
            for (name, value) in parse_parameters(&body)? {
                if name == VOLUME {
                    tracing::debug!(volume = value, "volume relayed");
                    self.volume = Some(value.trim().to_string());
                }
            }
        }

        self.replicate(request).await;
        Ok(ResponseBuilder::ok())
    }

    fn get_parameter(&self) -> ResponseBuilder {
        match &self.volume {
            Some(volume) => ResponseBuilder::ok().text_body(&volume_body(volume)),
            None => ResponseBuilder::ok(),
        }
    }

    async fn teardown(&mut self, request: &RtspRequest) -> ResponseBuilder {
        self.replicate(request).await;
        self.reset().await;
        self.state = SessionState::TornDown;

        tracing::info!(client = %self.client, "sender tore down proxy session");
        emit(
            &self.ctx.events,
            ServerEvent::TornDown {
                address: self.client,
            },
        );
        ResponseBuilder::ok()
    }
}

impl fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySession")
            .field("client", &self.client)
            .field("state", &self.state)
            .field("fanout", &self.fanout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RtspHandler for ProxySession {
    async fn handle(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        match &request.method {
            Method::Options => Ok(ResponseBuilder::ok().header(names::PUBLIC, Method::PUBLIC)),
            Method::Announce => self.announce(request).await,
            Method::Setup => self.setup(request).await,
            Method::Record => self.record(request).await,
            Method::Flush | Method::Pause => self.flush(request).await,
            Method::SetParameter => self.set_parameter(request).await,
            Method::GetParameter => Ok(self.get_parameter()),
            Method::Teardown => Ok(self.teardown(request).await),
            Method::Other(name) => Err(RaopError::NotImplemented(name.clone())),
        }
    }

    async fn shutdown(&mut self) {
        self.reset().await;
    }
}

/// Opens the upstream-facing channels during SETUP
struct UpstreamChannels<'a> {
    channels: &'a mut ChannelSet,
    bind_ip: IpAddr,
    ports: RtpPorts,
    fanout: Arc<FanOut>,
}

#[async_trait]
impl ChannelOpener for UpstreamChannels<'_> {
    async fn open_channel(
        &mut self,
        role: ChannelRole,
        remote: Option<SocketAddr>,
    ) -> Result<u16, RaopError> {
        let handler: Arc<dyn PacketHandler> = match role {
            ChannelRole::Audio => Arc::new(UpstreamAudioHandler::new(self.fanout.clone())),
            ChannelRole::Control => Arc::new(UpstreamControlHandler::new(self.fanout.clone())),
            ChannelRole::Timing => Arc::new(UpstreamTimingHandler::new(self.fanout.clone())),
        };
        let local = SocketAddr::new(self.bind_ip, self.ports.port(role));
        let channel = self.channels.open(role, local, remote, handler).await?;
        Ok(channel.local_port())
    }
}

/// Creates one [`ProxySession`] per connection
#[derive(Debug, Clone)]
pub struct ProxyFactory {
    ctx: Arc<ProxyContext>,
}

impl ProxyFactory {
    /// Factory sharing `ctx` across sessions
    #[must_use]
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }

    /// Shared proxy context
    #[must_use]
    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.ctx
    }
}

impl HandlerFactory for ProxyFactory {
    type Handler = ProxySession;

    fn create(&self, client: SocketAddr, local: SocketAddr) -> ProxySession {
        ProxySession::new(self.ctx.clone(), client, local)
    }
}

/// RTSP server replicating announced streams to downstream receivers
pub type ProxyServer = RtspServer<ProxyFactory>;

impl RtspServer<ProxyFactory> {
    /// Build a stopped proxy server from configuration
    ///
    /// Peers that point back at the proxy itself are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured private key cannot be loaded.
    pub fn proxy(config: &ProxyConfig, mac_address: [u8; 6]) -> Result<Self, CryptoError> {
        let private_key = config.load_private_key()?.map(Arc::new);
        let events = event_channel();

        let mut config = config.clone();
        config.remove_self_peers(&own_addresses(config.bind_address));

        let connection =
            ConnectionContext::new(mac_address, events.clone()).with_private_key(private_key);
        let bind = SocketAddr::new(config.bind_address, config.port);
        let name = config.name.clone();
        let ctx = ProxyContext { config, events };

        Ok(Self::new(name, bind, ProxyFactory::new(Arc::new(ctx)), connection))
    }
}

fn own_addresses(bind: IpAddr) -> Vec<IpAddr> {
    let mut addresses = vec![
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::LOCALHOST),
    ];
    if !bind.is_unspecified() {
        addresses.push(bind);
    }
    addresses
}
