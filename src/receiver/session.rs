//! Player session: one RTSP state machine per connection

use super::audio_pipeline::{AudioHandler, AudioPipeline, ControlHandler};
use super::channel::{ChannelRole, ChannelSet, PacketHandler};
use super::config::RtpPorts;
use super::connection::RtspHandler;
use super::events::{EventSender, ServerEvent, emit};
use super::negotiate::{ChannelOpener, negotiate_transport};
use super::parameters::{
    self, CONTENT_TYPE_PARAMETERS, VOLUME, format_volume, parse_parameters, parse_volume,
};
use super::timing::{ClockSync, TimingHandler, spawn_timing_requests};
use crate::audio::{AudioSink, DecoderFactory, GainMapping};
use crate::error::RaopError;
use crate::protocol::crypto::RaopRsaPrivateKey;
use crate::protocol::rtsp::headers::names;
use crate::protocol::rtsp::{Method, ResponseBuilder, RtspRequest};
use crate::protocol::sdp::{CONTENT_TYPE_SDP, StreamDescription};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Opaque token returned in the `Session` header
pub const SESSION_ID: &str = "DEADBEEF";

/// RTSP session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream announced
    Idle,
    /// ANNOUNCE accepted
    Announced,
    /// Channels negotiated
    SetUp,
    /// Audio is being delivered
    Recording,
    /// Buffered audio discarded, waiting for RECORD
    Flushed,
    /// TEARDOWN received
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Announced => "Announced",
            Self::SetUp => "SetUp",
            Self::Recording => "Recording",
            Self::Flushed => "Flushed",
            Self::TornDown => "TornDown",
        };
        f.write_str(name)
    }
}

/// Check that `method` may run in `state`
///
/// # Errors
///
/// Returns `RaopError::InvalidState` otherwise.
pub fn expect_state(
    method: &Method,
    state: SessionState,
    allowed: &[SessionState],
) -> Result<(), RaopError> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(RaopError::InvalidState {
            method: method.to_string(),
            state: state.to_string(),
        })
    }
}

/// Check that an ANNOUNCE carries an SDP body
///
/// # Errors
///
/// Returns `RaopError::Protocol` if `Content-Type` is missing or different.
pub fn require_sdp(request: &RtspRequest) -> Result<(), RaopError> {
    match request.headers.content_type() {
        Some(content_type) if content_type.trim() == CONTENT_TYPE_SDP => Ok(()),
        Some(content_type) => Err(RaopError::protocol(format!(
            "invalid Content-Type {content_type:?}, expected {CONTENT_TYPE_SDP}"
        ))),
        None => Err(RaopError::protocol("no Content-Type header")),
    }
}

/// Resources shared by every player session of one server
pub struct PlayerContext {
    /// Local RTP ports
    pub rtp_ports: RtpPorts,
    /// Key unwrapping announced AES keys
    pub private_key: Option<Arc<RaopRsaPrivateKey>>,
    /// Creates a decoder per announced stream
    pub decoders: Arc<dyn DecoderFactory>,
    /// Audio output
    pub sink: Arc<dyn AudioSink>,
    /// Interval between timing requests while recording
    pub timing_interval: Duration,
    /// Event channel of the owning server
    pub events: EventSender,
}

impl fmt::Debug for PlayerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerContext")
            .field("rtp_ports", &self.rtp_ports)
            .field("private_key", &self.private_key.is_some())
            .field("timing_interval", &self.timing_interval)
            .finish_non_exhaustive()
    }
}

/// State machine of one player connection
pub struct PlayerSession {
    ctx: Arc<PlayerContext>,
    client: SocketAddr,
    local: SocketAddr,
    state: SessionState,
    stream: Option<StreamDescription>,
    pipeline: Option<Arc<AudioPipeline>>,
    channels: ChannelSet,
    clock: Arc<Mutex<ClockSync>>,
    timing_task: Option<(CancellationToken, JoinHandle<()>)>,
    volume_known: bool,
}

impl PlayerSession {
    /// Session for a connection from `client` accepted on `local`
    #[must_use]
    pub fn new(ctx: Arc<PlayerContext>, client: SocketAddr, local: SocketAddr) -> Self {
        Self {
            ctx,
            client,
            local,
            state: SessionState::Idle,
            stream: None,
            pipeline: None,
            channels: ChannelSet::new(),
            clock: Arc::new(Mutex::new(ClockSync::new())),
            timing_task: None,
            volume_known: false,
        }
    }

    /// Current protocol state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream accepted by the last ANNOUNCE
    #[must_use]
    pub fn stream(&self) -> Option<&StreamDescription> {
        self.stream.as_ref()
    }

    /// Channels opened by SETUP
    #[must_use]
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Current clock offset estimate in microseconds
    #[must_use]
    pub fn clock_offset_micros(&self) -> i64 {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offset_micros()
    }

    /// Drop the stream and release every channel
    pub async fn reset(&mut self) {
        self.stop_timing().await;
        self.channels.close_all().await;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        self.stream = None;
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.state = SessionState::Idle;
    }

    async fn announce(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        require_sdp(request)?;

        let stream =
            StreamDescription::parse(&request.body_text(), self.ctx.private_key.as_deref())?;
        let pipeline =
            AudioPipeline::new(&stream, self.ctx.decoders.as_ref(), self.ctx.sink.clone())?;

        self.reset().await;

        tracing::info!(
            client = %self.client,
            format_index = stream.format_index,
            encrypted = stream.is_encrypted(),
            "stream announced"
        );
        emit(
            &self.ctx.events,
            ServerEvent::StreamAnnounced {
                address: self.client,
                encrypted: stream.is_encrypted(),
            },
        );

        self.stream = Some(stream);
        self.pipeline = Some(Arc::new(pipeline));
        self.state = SessionState::Announced;
        Ok(ResponseBuilder::ok())
    }

    async fn setup(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(&request.method, self.state, &[SessionState::Announced])?;

        let transport = request
            .headers
            .transport()
            .ok_or_else(|| RaopError::protocol("no Transport header"))?;
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| RaopError::protocol("audio stream not configured"))?;

        let result = {
            let mut opener = PlayerChannels {
                channels: &mut self.channels,
                bind_ip: self.local.ip(),
                ports: self.ctx.rtp_ports,
                pipeline: pipeline.clone(),
                clock: self.clock.clone(),
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

        pipeline.set_control(self.channels.get(ChannelRole::Control).cloned());
        self.state = SessionState::SetUp;

        tracing::info!(client = %self.client, transport = %negotiated, "transport negotiated");
        Ok(ResponseBuilder::ok()
            .header(names::TRANSPORT, &negotiated.to_string())
            .session(SESSION_ID))
    }

    async fn record(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(RaopError::protocol("audio stream not configured"));
        };
        expect_state(
            &request.method,
            self.state,
            &[
                SessionState::SetUp,
                SessionState::Recording,
                SessionState::Flushed,
            ],
        )?;

        if self.state == SessionState::SetUp {
            pipeline.start()?;
            self.start_timing().await;
        }

        if self.state != SessionState::Recording {
            tracing::info!(client = %self.client, "client started streaming");
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

    fn flush(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(
            &request.method,
            self.state,
            &[SessionState::Recording, SessionState::Flushed],
        )?;

        if let Some(pipeline) = &self.pipeline {
            pipeline.flush();
        }
        self.state = SessionState::Flushed;

        tracing::info!(client = %self.client, "client paused streaming, audio flushed");
        emit(
            &self.ctx.events,
            ServerEvent::Flushed {
                address: self.client,
            },
        );
        Ok(ResponseBuilder::ok())
    }

    fn set_parameter(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        expect_state(
            &request.method,
            self.state,
            &[
                SessionState::SetUp,
                SessionState::Recording,
                SessionState::Flushed,
            ],
        )?;

        // Artwork and DMAP metadata share the method but not the grammar.
        if let Some(content_type) = request.headers.content_type() {
            if content_type != CONTENT_TYPE_PARAMETERS {
                tracing::debug!(content_type, "ignoring SET_PARAMETER body");
                return Ok(ResponseBuilder::ok());
            }
        }

        let body = request.body_text();
        for (name, value) in parse_parameters(&body)? {
            if name == VOLUME {
                self.apply_volume(parse_volume(value)?);
            } else {
                tracing::debug!(name, value, "ignoring parameter");
            }
        }
        Ok(ResponseBuilder::ok())
    }

    fn apply_volume(&mut self, db: f32) {
        let (min, max) = self.ctx.sink.gain_range();
        let gain = GainMapping::new(min, max).to_device(db);
        self.ctx.sink.set_gain(gain);
        self.volume_known = true;

        tracing::info!(db, gain, "volume changed");
        emit(
            &self.ctx.events,
            ServerEvent::VolumeChanged {
                address: self.client,
                db,
            },
        );
    }

    fn get_parameter(&self) -> ResponseBuilder {
        if !self.volume_known {
            return ResponseBuilder::ok();
        }
        let (min, max) = self.ctx.sink.gain_range();
        let db = GainMapping::new(min, max).to_airtunes(self.ctx.sink.gain());
        ResponseBuilder::ok().text_body(&parameters::volume_body(&format_volume(db)))
    }

    async fn teardown(&mut self) -> ResponseBuilder {
        self.reset().await;
        self.state = SessionState::TornDown;

        tracing::info!(client = %self.client, "client initiated teardown");
        emit(
            &self.ctx.events,
            ServerEvent::TornDown {
                address: self.client,
            },
        );
        ResponseBuilder::ok()
    }

    async fn start_timing(&mut self) {
        self.stop_timing().await;
        let Some(channel) = self.channels.get(ChannelRole::Timing).cloned() else {
            return;
        };
        if channel.remote().is_none() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = spawn_timing_requests(channel, self.ctx.timing_interval, cancel.clone());
        self.timing_task = Some((cancel, task));
    }

    async fn stop_timing(&mut self) {
        if let Some((cancel, task)) = self.timing_task.take() {
            cancel.cancel();
            let _ = task.await;
        }
    }
}

#[async_trait]
impl RtspHandler for PlayerSession {
    async fn handle(&mut self, request: &RtspRequest) -> Result<ResponseBuilder, RaopError> {
        match &request.method {
            Method::Options => Ok(ResponseBuilder::ok().header(names::PUBLIC, Method::PUBLIC)),
            Method::Announce => self.announce(request).await,
            Method::Setup => self.setup(request).await,
            Method::Record => self.record(request).await,
            Method::Flush | Method::Pause => self.flush(request),
            Method::SetParameter => self.set_parameter(request),
            Method::GetParameter => Ok(self.get_parameter()),
            Method::Teardown => Ok(self.teardown().await),
            Method::Other(name) => Err(RaopError::NotImplemented(name.clone())),
        }
    }

    async fn shutdown(&mut self) {
        self.reset().await;
    }
}

/// Opens the player's channels during SETUP
struct PlayerChannels<'a> {
    channels: &'a mut ChannelSet,
    bind_ip: IpAddr,
    ports: RtpPorts,
    pipeline: Arc<AudioPipeline>,
    clock: Arc<Mutex<ClockSync>>,
}

#[async_trait]
impl ChannelOpener for PlayerChannels<'_> {
    async fn open_channel(
        &mut self,
        role: ChannelRole,
        remote: Option<SocketAddr>,
    ) -> Result<u16, RaopError> {
        let handler: Arc<dyn PacketHandler> = match role {
            ChannelRole::Audio => Arc::new(AudioHandler::new(self.pipeline.clone())),
            ChannelRole::Control => Arc::new(ControlHandler::new(self.pipeline.clone())),
            ChannelRole::Timing => Arc::new(TimingHandler::new(
                self.clock.clone(),
                self.pipeline.sink().clone(),
            )),
        };
        let local = SocketAddr::new(self.bind_ip, self.ports.port(role));
        let channel = self.channels.open(role, local, remote, handler).await?;
        Ok(channel.local_port())
    }
}
