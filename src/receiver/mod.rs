//! RAOP player
//!
//! Accepts RTSP sessions from a sender, negotiates the UDP channels,
//! decrypts and decodes the audio stream and hands PCM to an
//! [`AudioSink`](crate::audio::AudioSink).

pub mod audio_pipeline;
pub mod channel;
pub mod config;
pub mod connection;
pub mod events;
pub mod negotiate;
pub mod parameters;
pub mod player;
pub mod sequence_tracker;
pub mod session;
pub mod timing;

#[cfg(test)]
mod tests;

pub use channel::{ChannelRole, ChannelSet, DiscardHandler, PacketHandler, RtpChannel};
pub use config::{ReceiverConfig, RtpPorts};
pub use connection::{ConnectionContext, RtspHandler, serve_connection};
pub use events::{EventSender, ServerEvent, event_channel};
pub use player::{PlayerFactory, PlayerServer};
pub use session::{PlayerContext, PlayerSession, SESSION_ID, SessionState};
