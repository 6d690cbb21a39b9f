//! Server events for application integration

use std::net::SocketAddr;
use tokio::sync::broadcast;

/// Events published by a running RTSP server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Listener bound and accepting connections
    Started {
        /// Server name
        name: String,
        /// Bound address
        address: SocketAddr,
    },

    /// Listener stopped
    Stopped {
        /// Server name
        name: String,
    },

    /// Client connected
    ClientConnected {
        /// Client address
        address: SocketAddr,
    },

    /// Client disconnected
    ClientDisconnected {
        /// Client address
        address: SocketAddr,
        /// Disconnect reason
        reason: String,
    },

    /// ANNOUNCE accepted
    StreamAnnounced {
        /// Client address
        address: SocketAddr,
        /// Whether audio packets are AES encrypted
        encrypted: bool,
    },

    /// RECORD accepted
    RecordingStarted {
        /// Client address
        address: SocketAddr,
    },

    /// FLUSH or PAUSE accepted
    Flushed {
        /// Client address
        address: SocketAddr,
    },

    /// SET_PARAMETER changed the volume
    VolumeChanged {
        /// Client address
        address: SocketAddr,
        /// Volume in AirTunes dB (-144 to 0)
        db: f32,
    },

    /// TEARDOWN accepted
    TornDown {
        /// Client address
        address: SocketAddr,
    },
}

/// Sender half shared by servers and sessions
pub type EventSender = broadcast::Sender<ServerEvent>;

/// Capacity of a server's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Create an event channel with the default capacity
#[must_use]
pub fn event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}

/// Publish an event, ignoring the absence of subscribers
pub(crate) fn emit(events: &EventSender, event: ServerEvent) {
    let _ = events.send(event);
}
