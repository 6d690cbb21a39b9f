//! Player, proxy and advertisement bundled behind one start/stop pair

use crate::audio::{AudioSink, DecoderFactory, default_decoder_factory};
use crate::discovery::{AdvertiserConfig, AdvertiserError, AsyncRaopAdvertiser, device_mac};
use crate::protocol::crypto::CryptoError;
use crate::proxy::{ProxyConfig, ProxyServer};
use crate::receiver::{PlayerServer, ReceiverConfig};
use crate::server::ServerError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// What to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Local player; `None` disables it
    pub player: Option<ReceiverConfig>,
    /// Fan-out proxy; `None` disables it
    pub proxy: Option<ProxyConfig>,
    /// Hardware address override
    pub mac_address: Option<[u8; 6]>,
    /// Announce the running servers over mDNS
    pub advertise: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            player: Some(ReceiverConfig::default()),
            proxy: None,
            mac_address: None,
            advertise: true,
        }
    }
}

impl ServiceConfig {
    /// Run the player with `config`
    #[must_use]
    pub fn player(mut self, config: ReceiverConfig) -> Self {
        self.player = Some(config);
        self
    }

    /// Do not run the player
    #[must_use]
    pub fn without_player(mut self) -> Self {
        self.player = None;
        self
    }

    /// Run the proxy with `config`
    #[must_use]
    pub fn proxy(mut self, config: ProxyConfig) -> Self {
        self.proxy = Some(config);
        self
    }

    /// Use `mac` for both servers
    #[must_use]
    pub fn mac_address(mut self, mac: [u8; 6]) -> Self {
        self.mac_address = Some(mac);
        self
    }

    /// Whether to publish over mDNS
    #[must_use]
    pub fn advertise(mut self, advertise: bool) -> Self {
        self.advertise = advertise;
        self
    }
}

/// Errors starting the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Private key could not be loaded
    #[error("private key: {0}")]
    Crypto(#[from] CryptoError),

    /// A listener failed to start
    #[error("server: {0}")]
    Server(#[from] ServerError),

    /// mDNS registration failed
    #[error("advertisement: {0}")]
    Advertiser(#[from] AdvertiserError),
}

/// Running player and proxy servers
pub struct AirAudioService {
    player: Option<PlayerServer>,
    proxy: Option<ProxyServer>,
    advertisers: Vec<AsyncRaopAdvertiser>,
    mac_address: [u8; 6],
}

impl AirAudioService {
    /// Start everything `config` enables, decoding with the default decoder
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be loaded, a listener cannot bind or
    /// a service cannot be registered. Anything already started is stopped.
    pub async fn start(
        config: ServiceConfig,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, ServiceError> {
        Self::start_with_decoders(config, sink, default_decoder_factory()).await
    }

    /// Start with a custom decoder factory
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn start_with_decoders(
        config: ServiceConfig,
        sink: Arc<dyn AudioSink>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Result<Self, ServiceError> {
        let mac_address = device_mac(config.mac_address);
        let mut service = Self {
            player: None,
            proxy: None,
            advertisers: Vec::new(),
            mac_address,
        };

        if let Err(e) = service.launch(&config, sink, decoders).await {
            service.stop_all().await;
            return Err(e);
        }
        Ok(service)
    }

    async fn launch(
        &mut self,
        config: &ServiceConfig,
        sink: Arc<dyn AudioSink>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Result<(), ServiceError> {
        if let Some(player_config) = &config.player {
            let mut player = PlayerServer::player(player_config, sink, decoders, self.mac_address)?;
            let address = player.start().await;
            self.player = Some(player);
            self.advertise(config, &player_config.name, address?).await?;
        }

        if let Some(proxy_config) = &config.proxy {
            let mut proxy = ProxyServer::proxy(proxy_config, self.mac_address)?;
            let address = proxy.start().await;
            self.proxy = Some(proxy);
            self.advertise(config, &proxy_config.name, address?).await?;
        }

        tracing::info!(
            player = ?self.player_addr(),
            proxy = ?self.proxy_addr(),
            advertised = self.advertisers.len(),
            "AirAudio service started"
        );
        Ok(())
    }

    async fn advertise(
        &mut self,
        config: &ServiceConfig,
        name: &str,
        address: SocketAddr,
    ) -> Result<(), ServiceError> {
        if !config.advertise {
            return Ok(());
        }
        let advertiser = AsyncRaopAdvertiser::start(
            AdvertiserConfig::new(name, address.port()).mac(self.mac_address),
        )
        .await?;
        self.advertisers.push(advertiser);
        Ok(())
    }

    /// Hardware address used for naming and `Apple-Response`
    #[must_use]
    pub fn mac_address(&self) -> [u8; 6] {
        self.mac_address
    }

    /// Running player, if configured
    #[must_use]
    pub fn player(&self) -> Option<&PlayerServer> {
        self.player.as_ref()
    }

    /// Running proxy, if configured
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyServer> {
        self.proxy.as_ref()
    }

    /// Bound address of the player listener
    #[must_use]
    pub fn player_addr(&self) -> Option<SocketAddr> {
        self.player.as_ref().and_then(PlayerServer::local_addr)
    }

    /// Bound address of the proxy listener
    #[must_use]
    pub fn proxy_addr(&self) -> Option<SocketAddr> {
        self.proxy.as_ref().and_then(ProxyServer::local_addr)
    }

    /// Names under which the servers are advertised
    #[must_use]
    pub fn advertised_names(&self) -> Vec<&str> {
        self.advertisers
            .iter()
            .map(AsyncRaopAdvertiser::service_name)
            .collect()
    }

    /// Withdraw advertisements, then stop both servers
    pub async fn stop(mut self) {
        self.stop_all().await;
        tracing::info!("AirAudio service stopped");
    }

    async fn stop_all(&mut self) {
        for advertiser in self.advertisers.drain(..) {
            advertiser.shutdown().await;
        }
        if let Some(mut proxy) = self.proxy.take() {
            proxy.stop().await;
        }
        if let Some(mut player) = self.player.take() {
            player.stop().await;
        }
    }
}
