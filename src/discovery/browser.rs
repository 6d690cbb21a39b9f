//! Browsing for other RAOP receivers on the network
//!
//! Used to find proxy peers. Instances resolving to one of the host's own
//! addresses are skipped so a proxy never fans out to itself.

use super::advertiser::AdvertiserError;
use super::raop::{RAOP_SERVICE_TYPE, instance_of, parse_raop_service_name};
use crate::proxy::config::PeerAddress;
use futures::Stream;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A RAOP receiver found on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Friendly name (instance name without the MAC prefix)
    pub name: String,
    /// First resolved address
    pub address: IpAddr,
    /// RTSP port
    pub port: u16,
}

impl DiscoveredPeer {
    /// Build from a resolved service, unless it lives at one of `own_addresses`
    #[must_use]
    pub fn from_service(info: &ServiceInfo, own_addresses: &[IpAddr]) -> Option<Self> {
        let addresses = info.get_addresses();
        if addresses.iter().any(|ip| own_addresses.contains(ip)) {
            return None;
        }

        let mut candidates: Vec<IpAddr> = addresses.iter().copied().collect();
        candidates.sort_by_key(|ip| (ip.is_ipv6(), *ip));
        let address = candidates.into_iter().next()?;

        let instance = instance_of(info.get_fullname());
        let name = parse_raop_service_name(instance)
            .map_or_else(|| instance.to_string(), |(_, name)| name);

        Some(Self {
            name,
            address,
            port: info.get_port(),
        })
    }
}

impl From<&DiscoveredPeer> for PeerAddress {
    fn from(peer: &DiscoveredPeer) -> Self {
        PeerAddress::new(peer.address.to_string(), peer.port)
    }
}

/// Browser events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A receiver resolved or changed
    Found(DiscoveredPeer),
    /// A receiver left; carries its full service name
    Lost(String),
}

/// mDNS browser for `_raop._tcp` receivers
pub struct PeerBrowser {
    own_addresses: Vec<IpAddr>,
}

impl PeerBrowser {
    /// Browser skipping services at `own_addresses`
    #[must_use]
    pub fn new(own_addresses: Vec<IpAddr>) -> Self {
        Self { own_addresses }
    }

    /// Start browsing
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be initialized.
    pub fn browse(self) -> Result<impl Stream<Item = PeerEvent>, AdvertiserError> {
        PeerStream::new(self.own_addresses)
    }

    /// Browse for `timeout` and return every receiver still present
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be initialized.
    pub async fn scan(self, timeout: Duration) -> Result<Vec<DiscoveredPeer>, AdvertiserError> {
        use futures::StreamExt;

        let stream = self.browse()?;
        tokio::pin!(stream);

        let mut found: HashMap<String, DiscoveredPeer> = HashMap::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => break,
                event = stream.next() => match event {
                    Some(PeerEvent::Found(peer)) => {
                        found.insert(format!("{}:{}", peer.address, peer.port), peer);
                    }
                    Some(PeerEvent::Lost(_)) => {}
                    None => break,
                },
            }
        }

        Ok(found.into_values().collect())
    }
}

struct PeerStream {
    mdns: ServiceDaemon,
    stream: Box<dyn Stream<Item = ServiceEvent> + Send + Unpin>,
    own_addresses: Vec<IpAddr>,
}

impl PeerStream {
    fn new(own_addresses: Vec<IpAddr>) -> Result<Self, AdvertiserError> {
        let mdns = ServiceDaemon::new()?;
        let receiver = mdns.browse(RAOP_SERVICE_TYPE)?;

        Ok(Self {
            mdns,
            stream: Box::new(receiver.into_stream()),
            own_addresses,
        })
    }

    fn process_event(&self, event: ServiceEvent) -> Option<PeerEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let peer = DiscoveredPeer::from_service(&info, &self.own_addresses)?;
                tracing::debug!(name = %peer.name, address = %peer.address, port = peer.port, "RAOP receiver found");
                Some(PeerEvent::Found(peer))
            }
            ServiceEvent::ServiceRemoved(_, fullname) => Some(PeerEvent::Lost(fullname)),
            _ => None,
        }
    }
}

impl Stream for PeerStream {
    type Item = PeerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let event = match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(event)) => event,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            if let Some(peer_event) = self.process_event(event) {
                return Poll::Ready(Some(peer_event));
            }
        }
    }
}

impl Drop for PeerStream {
    fn drop(&mut self) {
        let _ = self.mdns.stop_browse(RAOP_SERVICE_TYPE);
        let _ = self.mdns.shutdown();
    }
}
