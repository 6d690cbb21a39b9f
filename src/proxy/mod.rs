//! Multi-room fan-out proxy
//!
//! The proxy looks like a single RAOP receiver to the sender. Every RTSP
//! request is answered locally and replicated to a list of downstream
//! receivers ("peers"); audio and control datagrams are copied to each
//! peer, and each peer's timing traffic is routed back to it alone.

pub mod barrier;
pub mod config;
pub mod fanout;
pub mod history;
pub mod peer;
pub mod session;
pub mod timing_router;

#[cfg(test)]
mod tests;

pub use barrier::{BarrierOutcome, wait_for_cseq};
pub use config::{ConfigError, PeerAddress, ProxyConfig};
pub use fanout::FanOut;
pub use history::PacketHistory;
pub use peer::ProxyPeer;
pub use session::{ProxyContext, ProxyFactory, ProxyServer, ProxySession};
pub use timing_router::TimingKeyTable;
