//! Player server assembly

use super::config::ReceiverConfig;
use super::connection::ConnectionContext;
use super::events::event_channel;
use super::session::{PlayerContext, PlayerSession};
use crate::audio::{AudioSink, DecoderFactory};
use crate::protocol::crypto::CryptoError;
use crate::server::{HandlerFactory, RtspServer};
use std::net::SocketAddr;
use std::sync::Arc;

/// Creates one [`PlayerSession`] per connection
#[derive(Debug, Clone)]
pub struct PlayerFactory {
    ctx: Arc<PlayerContext>,
}

impl PlayerFactory {
    /// Factory sharing `ctx` across sessions
    #[must_use]
    pub fn new(ctx: Arc<PlayerContext>) -> Self {
        Self { ctx }
    }

    /// Shared player context
    #[must_use]
    pub fn context(&self) -> &Arc<PlayerContext> {
        &self.ctx
    }
}

impl HandlerFactory for PlayerFactory {
    type Handler = PlayerSession;

    fn create(&self, client: SocketAddr, local: SocketAddr) -> PlayerSession {
        PlayerSession::new(self.ctx.clone(), client, local)
    }
}

/// RTSP server playing announced streams to an [`AudioSink`]
pub type PlayerServer = RtspServer<PlayerFactory>;

impl RtspServer<PlayerFactory> {
    /// Build a stopped player server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configured private key cannot be loaded.
    pub fn player(
        config: &ReceiverConfig,
        sink: Arc<dyn AudioSink>,
        decoders: Arc<dyn DecoderFactory>,
        mac_address: [u8; 6],
    ) -> Result<Self, CryptoError> {
        let private_key = config.load_private_key()?.map(Arc::new);
        let events = event_channel();

        let ctx = PlayerContext {
            rtp_ports: config.rtp_ports,
            private_key: private_key.clone(),
            decoders,
            sink,
            timing_interval: config.timing_interval,
            events: events.clone(),
        };
        let connection = ConnectionContext::new(mac_address, events).with_private_key(private_key);

        Ok(Self::new(
            config.name.clone(),
            SocketAddr::new(config.bind_address, config.port),
            PlayerFactory::new(Arc::new(ctx)),
            connection,
        ))
    }
}
