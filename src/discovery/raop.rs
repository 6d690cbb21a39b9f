//! RAOP service naming

/// RAOP service type for mDNS discovery
pub const RAOP_SERVICE_TYPE: &str = "_raop._tcp.local.";

/// Format MAC address for RAOP service name (uppercase, no colons)
#[must_use]
pub fn format_mac_for_service(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{b:02X}")).collect()
}

/// Instance name `HEXMAC@name`
#[must_use]
pub fn service_instance_name(mac: &[u8; 6], name: &str) -> String {
    format!("{}@{name}", format_mac_for_service(mac))
}

/// Parse RAOP service instance name
///
/// RAOP service names follow the format: `{MAC_ADDRESS}@{DEVICE_NAME}`
/// Example: "0050C212A23F@Living Room"
#[must_use]
pub fn parse_raop_service_name(name: &str) -> Option<(String, String)> {
    let (mac, device_name) = name.split_once('@')?;
    let mac = mac.to_uppercase();

    (mac.len() == 12 && mac.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| (mac, device_name.to_string()))
}

/// Instance part of a full service name
#[must_use]
pub fn instance_of(fullname: &str) -> &str {
    fullname
        .strip_suffix(RAOP_SERVICE_TYPE)
        .map_or(fullname, |rest| rest.trim_end_matches('.'))
}
