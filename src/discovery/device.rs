//! Discovered devices and per-device sweep results.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::actions::ActionIdentifier;
use crate::session::Credentials;

use super::browse::format_mac_token;

/// The mDNS service type a sweep looks for, e.g. `_workstation._tcp.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    /// Service type advertised by Linux workstations.
    pub const WORKSTATION: &'static str = "_workstation._tcp.";

    /// Creates an identifier from a service type.
    ///
    /// # Panics
    /// Panics if `service_type` is empty.
    #[must_use]
    pub fn new(service_type: impl Into<String>) -> Self {
        let service_type = service_type.into();
        assert!(!service_type.is_empty(), "service type must not be empty");
        Self(service_type)
    }

    /// Returns the service type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceIdentifier {
    fn default() -> Self {
        Self(Self::WORKSTATION.to_string())
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The mDNS domain to browse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// The link-local domain `local.`.
    #[default]
    Local,
    /// Any other domain, stored verbatim.
    Custom(String),
}

impl Domain {
    /// Returns the domain string passed to the browser.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Local => "local.",
            Self::Custom(domain) => domain,
        }
    }

    /// Parses a domain, mapping `local`/`local.` to [`Domain::Local`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "local" | "local." => Self::Local,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// A device found during a sweep.
///
/// Immutable once built. Two devices compare equal when they were found
/// under the same identifier.
#[derive(Clone, Serialize)]
pub struct Device {
    identifier: DeviceIdentifier,
    hostname: String,
    mac_address: Option<u64>,
    ipv4_address: Option<Ipv4Addr>,
    username: String,
    #[serde(skip)]
    password: String,
}

impl Device {
    /// Builds a device record.
    #[must_use]
    pub fn new(
        identifier: DeviceIdentifier,
        hostname: impl Into<String>,
        mac_address: Option<u64>,
        ipv4_address: Option<Ipv4Addr>,
        credentials: Credentials,
    ) -> Self {
        Self {
            identifier,
            hostname: hostname.into(),
            mac_address,
            ipv4_address,
            username: credentials.username,
            password: credentials.password,
        }
    }

    /// Identifier the device was found under.
    #[must_use]
    pub fn identifier(&self) -> &DeviceIdentifier {
        &self.identifier
    }

    /// Hostname taken from the advertised service name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// MAC address, if the service name carried one.
    #[must_use]
    pub fn mac_address(&self) -> Option<u64> {
        self.mac_address
    }

    /// Resolved IPv4 address.
    #[must_use]
    pub fn ipv4_address(&self) -> Option<Ipv4Addr> {
        self.ipv4_address
    }

    /// Username for remote sessions (empty if none configured).
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Credentials for remote sessions.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("identifier", &self.identifier)
            .field("hostname", &self.hostname)
            .field("mac_address", &self.mac_address.map(format_mac_token))
            .field("ipv4_address", &self.ipv4_address)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname)?;
        if let Some(mac) = self.mac_address {
            write!(f, " {}", format_mac_token(mac))?;
        }
        if let Some(ip) = self.ipv4_address {
            write!(f, " ({ip})")?;
        }
        Ok(())
    }
}

/// Returns the first device with the given MAC address.
#[must_use]
pub fn find_by_mac(devices: &[Device], mac: u64) -> Option<&Device> {
    devices.iter().find(|d| d.mac_address == Some(mac))
}

/// What a sweep learned about one device.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    /// The device.
    pub device: Device,
    /// Count reported by each action that succeeded.
    pub found_end_devices: BTreeMap<ActionIdentifier, u32>,
}

impl DiscoveryResult {
    /// A result with no action counts.
    #[must_use]
    pub fn empty(device: Device) -> Self {
        Self {
            device,
            found_end_devices: BTreeMap::new(),
        }
    }

    /// Total count across all actions.
    #[must_use]
    pub fn total_end_devices(&self) -> u64 {
        self.found_end_devices.values().map(|&c| u64::from(c)).sum()
    }
}

impl PartialEq for DiscoveryResult {
    fn eq(&self, other: &Self) -> bool {
        self.device.identifier == other.device.identifier
            && self.found_end_devices == other.found_end_devices
    }
}

impl Eq for DiscoveryResult {}
