//! # airaudio
//!
//! A RAOP (AirTunes) audio receiver with a multi-room fan-out proxy.
//!
//! ## Features
//!
//! - RTSP session handling for RAOP senders (ANNOUNCE, SETUP, RECORD, FLUSH, TEARDOWN, volume)
//! - AES-CBC decryption of RSA-wrapped stream keys and `Apple-Challenge` answers
//! - UDP audio, control and timing channels with retransmit requests and clock sync
//! - A proxy that replicates one sender's stream to several downstream receivers
//! - mDNS advertisement and peer discovery
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use airaudio::audio::NullSink;
//! use airaudio::{AirAudioService, ServiceConfig};
//!
//! # async fn example() -> Result<(), airaudio::ServiceError> {
//! let service = AirAudioService::start(ServiceConfig::default(), Arc::new(NullSink::default())).await?;
//! println!("player listening on {:?}", service.player_addr());
//!
//! // ...
//! service.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Service**: [`AirAudioService`] - player, proxy and advertisement together
//! - **Servers**: [`server::RtspServer`] with a player or proxy session per connection
//! - **Low-level**: sans-IO protocol modules under [`protocol`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Error types
pub mod error;

pub mod audio;
pub mod discovery;
pub mod protocol;
pub mod proxy;
pub mod receiver;
pub mod server;
pub mod service;

// Re-exports
pub use audio::{AudioFormat, AudioSink, DecoderFactory, GainMapping};
pub use discovery::{AsyncRaopAdvertiser, DiscoveredPeer, PeerBrowser};
pub use error::RaopError;
pub use proxy::{PeerAddress, ProxyConfig, ProxyServer};
pub use receiver::{PlayerServer, ReceiverConfig, RtpPorts, ServerEvent};
pub use server::{HandlerFactory, RtspServer, ServerError};
pub use service::{AirAudioService, ServiceConfig, ServiceError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AirAudioService, AudioSink, PeerAddress, PlayerServer, ProxyConfig, ProxyServer,
        RaopError, ReceiverConfig, ServerEvent, ServiceConfig,
    };
}
