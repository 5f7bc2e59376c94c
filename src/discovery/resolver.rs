//! Hostname to IPv4 resolution for discovered services.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use tracing::{debug, warn};

/// Resolves a service's hostname within a domain to an IPv4 address.
pub trait IpResolver: Send + Sync {
    /// Returns the best IPv4 address for `hostname` in `domain`, if any.
    fn resolve(&self, hostname: &str, domain: &str) -> Option<Ipv4Addr>;
}

/// Joins `hostname` and `domain` into a lookup name, e.g. `pi-01.local`.
#[must_use]
pub fn qualified_hostname(hostname: &str, domain: &str) -> String {
    let hostname = hostname.trim_end_matches('.');
    let domain = domain.trim_matches('.');
    if domain.is_empty() || hostname.ends_with(&format!(".{domain}")) {
        hostname.to_string()
    } else {
        format!("{hostname}.{domain}")
    }
}

/// Picks the preferred IPv4 address: the first non-loopback one, else the
/// first one.
#[must_use]
pub fn preferred_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    let v4: Vec<Ipv4Addr> = addresses
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    v4.iter()
        .find(|ip| !ip.is_loopback())
        .or_else(|| v4.first())
        .copied()
}

/// Resolver using the operating system's name service, which handles
/// `.local` names where an mDNS responder is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl IpResolver for SystemResolver {
    fn resolve(&self, hostname: &str, domain: &str) -> Option<Ipv4Addr> {
        let name = qualified_hostname(hostname, domain);
        match (name.as_str(), 0).to_socket_addrs() {
            Ok(addresses) => {
                let ip = preferred_ipv4(addresses.map(|a| a.ip()));
                if ip.is_none() {
                    debug!("{} has no IPv4 address", name);
                }
                ip
            }
            Err(e) => {
                warn!("Cannot resolve {}: {}", name, e);
                None
            }
        }
    }
}

/// Resolver answering from a fixed table keyed by hostname.
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    table: HashMap<String, Ipv4Addr>,
}

impl TableResolver {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hostname mapping.
    #[must_use]
    pub fn with(mut self, hostname: impl Into<String>, address: Ipv4Addr) -> Self {
        self.table.insert(hostname.into(), address);
        self
    }
}

impl IpResolver for TableResolver {
    fn resolve(&self, hostname: &str, _domain: &str) -> Option<Ipv4Addr> {
        self.table.get(hostname).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_qualified_hostname() {
        assert_eq!(qualified_hostname("pi-01", "local."), "pi-01.local");
        assert_eq!(qualified_hostname("pi-01.local.", "local."), "pi-01.local");
        assert_eq!(qualified_hostname("pi-01", ""), "pi-01");
    }

    #[test]
    fn test_preferred_ipv4() {
        let addrs = vec![
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        ];
        assert_eq!(preferred_ipv4(addrs), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            preferred_ipv4(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]),
            Some(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(preferred_ipv4(vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]), None);
    }

    #[test]
    fn test_table_resolver() {
        let resolver = TableResolver::new().with("pi-01", Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(resolver.resolve("pi-01", "local."), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(resolver.resolve("pi-02", "local."), None);
    }
}
