//! RAOP service advertisement

use super::raop::{RAOP_SERVICE_TYPE, service_instance_name};
use mdns_sd::{Error as MdnsError, ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Errors from service advertisement and browsing
#[derive(Debug, thiserror::Error)]
pub enum AdvertiserError {
    /// Failed to retrieve MAC address
    #[error("Failed to retrieve MAC address: {0}")]
    MacRetrievalFailed(String),

    /// mDNS error
    #[error("mDNS error: {0}")]
    Mdns(#[from] MdnsError),

    /// Service not registered
    #[error("Service not registered")]
    NotRegistered,

    /// Service already registered
    #[error("Service already registered")]
    AlreadyRegistered,
}

/// TXT properties every RAOP sender expects, in advertisement order
pub const RAOP_TXT: [(&str, &str); 12] = [
    ("txtvers", "1"),
    ("tp", "UDP"),
    ("ch", "2"),
    ("ss", "16"),
    ("sr", "44100"),
    ("pw", "false"),
    ("sm", "false"),
    ("sv", "false"),
    ("ek", "1"),
    ("et", "0,1"),
    ("cn", "0,1"),
    ("vn", "3"),
];

/// TXT properties as handed to mdns-sd
#[must_use]
pub fn txt_properties() -> HashMap<String, String> {
    RAOP_TXT
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Hardware address for the service instance name and `Apple-Response`
///
/// Uses `mac_override` when given, else the first usable interface, else a
/// stable pseudo address.
#[must_use]
pub fn device_mac(mac_override: Option<[u8; 6]>) -> [u8; 6] {
    if let Some(mac) = mac_override {
        return mac;
    }
    match interface_mac() {
        Ok(mac) => mac,
        Err(e) => {
            tracing::debug!(error = %e, "no interface MAC, using a generated one");
            generate_stable_mac()
        }
    }
}

#[cfg(target_os = "linux")]
fn interface_mac() -> Result<[u8; 6], AdvertiserError> {
    use std::fs;

    let failed = |e: std::io::Error| AdvertiserError::MacRetrievalFailed(e.to_string());

    let mut names: Vec<_> = fs::read_dir("/sys/class/net")
        .map_err(failed)?
        .filter_map(Result::ok)
        .collect();
    names.sort_by_key(fs::DirEntry::file_name);

    for entry in names {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "lo" || name.starts_with("veth") || name.starts_with("docker") {
            continue;
        }

        if let Ok(mac) = fs::read_to_string(entry.path().join("address")) {
            let mac = mac.trim();
            if mac != "00:00:00:00:00:00" {
                return parse_mac_string(mac);
            }
        }
    }

    Err(AdvertiserError::MacRetrievalFailed(
        "No suitable interface found".into(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn interface_mac() -> Result<[u8; 6], AdvertiserError> {
    Err(AdvertiserError::MacRetrievalFailed(
        "Not supported on this platform".into(),
    ))
}

/// Parse a colon-separated MAC address
///
/// # Errors
///
/// Returns `AdvertiserError::MacRetrievalFailed` for anything but six hex octets.
pub fn parse_mac_string(mac: &str) -> Result<[u8; 6], AdvertiserError> {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(AdvertiserError::MacRetrievalFailed(format!(
            "Invalid MAC format: {mac}"
        )));
    }

    let mut bytes = [0u8; 6];
    for (byte, part) in bytes.iter_mut().zip(&parts) {
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| AdvertiserError::MacRetrievalFailed(format!("Invalid hex: {part}")))?;
    }

    Ok(bytes)
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Hash extraction safely truncates to expected mac byte sizes"
)]
pub(crate) fn generate_stable_mac() -> [u8; 6] {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let seed = std::fs::read_to_string("/etc/machine-id").unwrap_or_else(|_| {
        hostname::get().map_or_else(
            |_| "airaudio".to_string(),
            |h| h.to_string_lossy().into_owned(),
        )
    });

    let mut hasher = DefaultHasher::new();
    seed.trim().hash(&mut hasher);
    let hash = hasher.finish();

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = (hash >> (40 - 8 * i)) as u8;
    }
    // Locally administered, unicast
    mac[0] = (mac[0] | 0x02) & !0x01;
    mac
}

/// Configuration for RAOP service advertisement
#[derive(Debug, Clone)]
pub struct AdvertiserConfig {
    /// Friendly name shown to senders
    pub name: String,
    /// RTSP port to advertise
    pub port: u16,
    /// Hardware address; detected when absent
    pub mac_override: Option<[u8; 6]>,
}

impl AdvertiserConfig {
    /// Advertise `name` on `port`
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            mac_override: None,
        }
    }

    /// Use `mac` instead of looking it up
    #[must_use]
    pub fn mac(mut self, mac: [u8; 6]) -> Self {
        self.mac_override = Some(mac);
        self
    }
}

/// Registers one `_raop._tcp` instance with a blocking mDNS daemon
pub struct RaopAdvertiser {
    config: AdvertiserConfig,
    daemon: ServiceDaemon,
    service_fullname: Option<String>,
    mac: [u8; 6],
}

impl RaopAdvertiser {
    /// Create an advertiser; nothing is announced until [`register`](Self::register)
    ///
    /// # Errors
    ///
    /// Returns error if the mDNS daemon cannot be initialized.
    pub fn new(config: AdvertiserConfig) -> Result<Self, AdvertiserError> {
        let daemon = ServiceDaemon::new()?;
        let mac = device_mac(config.mac_override);

        Ok(Self {
            config,
            daemon,
            service_fullname: None,
            mac,
        })
    }

    /// Instance name, `HEXMAC@name`
    #[must_use]
    pub fn service_name(&self) -> String {
        service_instance_name(&self.mac, &self.config.name)
    }

    /// MAC address used in the instance name
    #[must_use]
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Whether the service is currently published
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.service_fullname.is_some()
    }

    /// Register the service on the network
    ///
    /// # Errors
    ///
    /// Returns error if service is already registered or mDNS registration fails.
    pub fn register(&mut self) -> Result<(), AdvertiserError> {
        if self.service_fullname.is_some() {
            return Err(AdvertiserError::AlreadyRegistered);
        }

        let service_name = self.service_name();
        let hostname = hostname::get().map_or_else(
            |_| format!("{}.local.", self.config.name.replace(' ', "-").to_lowercase()),
            |h| format!("{}.local.", h.to_string_lossy()),
        );
        let service_info = ServiceInfo::new(
            RAOP_SERVICE_TYPE,
            &service_name,
            &hostname,
            "",
            self.config.port,
            txt_properties(),
        )?
        .enable_addr_auto();

        let fullname = service_info.get_fullname().to_string();
        self.daemon.register(service_info)?;
        self.service_fullname = Some(fullname);

        tracing::info!(
            name = %service_name,
            port = %self.config.port,
            "RAOP service registered"
        );

        Ok(())
    }

    /// Unregister the service from the network
    ///
    /// # Errors
    ///
    /// Returns error if service is not registered or mDNS unregistration fails.
    pub fn unregister(&mut self) -> Result<(), AdvertiserError> {
        let fullname = self
            .service_fullname
            .take()
            .ok_or(AdvertiserError::NotRegistered)?;

        self.daemon.unregister(&fullname)?;

        tracing::info!(name = %fullname, "RAOP service unregistered");

        Ok(())
    }
}

impl Drop for RaopAdvertiser {
    fn drop(&mut self) {
        if self.service_fullname.is_some() {
            let _ = self.unregister();
        }
        let _ = self.daemon.shutdown();
    }
}

/// Commands for the advertiser task
#[derive(Debug)]
pub enum AdvertiserCommand {
    /// Unregister and stop
    Shutdown(oneshot::Sender<()>),
}

/// Async handle over a [`RaopAdvertiser`]
///
/// The blocking daemon lives in a `spawn_blocking` task driven by a command
/// channel.
pub struct AsyncRaopAdvertiser {
    command_tx: mpsc::Sender<AdvertiserCommand>,
    mac: [u8; 6],
    service_name: String,
}

impl AsyncRaopAdvertiser {
    /// Register the service and keep it announced until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the daemon cannot be created or registration fails.
    pub async fn start(config: AdvertiserConfig) -> Result<Self, AdvertiserError> {
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let mut advertiser = match RaopAdvertiser::new(config) {
                Ok(advertiser) => advertiser,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = advertiser.register() {
                let _ = ready_tx.send(Err(e));
                return;
            }
            let _ = ready_tx.send(Ok((advertiser.mac(), advertiser.service_name())));

            let done = match command_rx.blocking_recv() {
                Some(AdvertiserCommand::Shutdown(done)) => Some(done),
                None => None,
            };

            if let Err(e) = advertiser.unregister() {
                tracing::warn!(error = %e, "Failed to unregister RAOP service");
            }
            drop(advertiser);
            if let Some(done) = done {
                let _ = done.send(());
            }
        });

        let (mac, service_name) = ready_rx.await.map_err(|_| {
            AdvertiserError::MacRetrievalFailed("advertiser task exited".to_string())
        })??;

        Ok(Self {
            command_tx,
            mac,
            service_name,
        })
    }

    /// Get the service name being advertised
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Get the MAC address
    #[must_use]
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Unregister and wait for the daemon to stop
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(AdvertiserCommand::Shutdown(done_tx))
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}
