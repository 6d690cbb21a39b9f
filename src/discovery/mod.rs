//! mDNS advertisement of the receiver and discovery of proxy peers

pub mod advertiser;
pub mod browser;
pub mod raop;


pub use advertiser::{
    AdvertiserConfig, AdvertiserError, AsyncRaopAdvertiser, RAOP_TXT, RaopAdvertiser, device_mac,
};
pub use browser::{DiscoveredPeer, PeerBrowser, PeerEvent};
pub use raop::{RAOP_SERVICE_TYPE, format_mac_for_service, service_instance_name};
