//! Service browse events and service-name parsing.
//!
//! A [`BrowseBackend`] delivers [`BrowseEvent`]s over a channel, in the same
//! way a scanner reports progress to its owner.

use std::sync::mpsc::Receiver;

use super::error::DiscoveryError;

/// A service instance seen by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Instance name, e.g. `pi-01 [b8:27:eb:12:34:56]`.
    pub name: String,
    /// Domain the instance was seen in. Empty means the browsed domain.
    pub domain: String,
}

impl ServiceRecord {
    /// Creates a service record.
    #[must_use]
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }
}

/// Events produced while browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// The browser is about to search.
    WillSearch,
    /// A service instance appeared.
    Found(ServiceRecord),
    /// A service instance went away.
    Removed(ServiceRecord),
    /// The browser reported an error; the search may continue.
    Error(String),
}

/// Source of browse events for one service type and domain.
pub trait BrowseBackend: Send {
    /// Starts browsing and returns the event stream.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::BrowseStart`] if browsing cannot begin.
    fn start(
        &mut self,
        service_type: &str,
        domain: &str,
    ) -> Result<Receiver<BrowseEvent>, DiscoveryError>;

    /// Stops browsing. Safe to call more than once.
    fn stop(&mut self);
}

/// Splits a service name into its hostname and optional MAC address.
///
/// The name is `<hostname> [aa:bb:cc:dd:ee:ff]`; anything after the MAC
/// token is ignored.
#[must_use]
pub fn parse_service_name(name: &str) -> (String, Option<u64>) {
    let mut parts = name.split_whitespace();
    let hostname = parts.next().unwrap_or_default().to_string();
    let mac = parts.next().and_then(parse_mac_token);
    (hostname, mac)
}

/// Parses a bracketed MAC token such as `[b8:27:eb:12:34:56]`.
///
/// Returns `None` if the token is not hexadecimal or does not fit 64 bits.
#[must_use]
pub fn parse_mac_token(token: &str) -> Option<u64> {
    let digits: String = token
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':'))
        .collect();
    if digits.is_empty() || digits.len() > 16 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(&digits, 16).ok()
}

/// Formats the low 48 bits of `mac` as `[aa:bb:cc:dd:ee:ff]`.
#[must_use]
pub fn format_mac_token(mac: u64) -> String {
    let octets: Vec<String> = (0..6)
        .rev()
        .map(|i| format!("{:02x}", (mac >> (i * 8)) & 0xff))
        .collect();
    format!("[{}]", octets.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_service_name_with_mac() {
        let (host, mac) = parse_service_name("pi-01 [b8:27:eb:12:34:56]");
        assert_eq!(host, "pi-01");
        assert_eq!(mac, Some(0xb827_eb12_3456));
    }

    #[test]
    fn test_parse_service_name_without_mac() {
        assert_eq!(parse_service_name("pi-01"), ("pi-01".to_string(), None));
        assert_eq!(parse_service_name(""), (String::new(), None));
    }

    #[test]
    fn test_parse_mac_token_rejects_garbage() {
        assert_eq!(parse_mac_token("[zz:zz]"), None);
        assert_eq!(parse_mac_token("[]"), None);
        assert_eq!(parse_mac_token("[11:22:33:44:55:66:77:88:99]"), None);
    }

    #[test]
    fn test_parse_mac_token_rejects_sign() {
        assert_eq!(parse_mac_token("[+abc]"), None);
        assert_eq!(parse_mac_token("[+a:bc]"), None);
        assert_eq!(parse_mac_token("[abc]"), Some(0xabc));
    }

    #[test]
    fn test_format_mac_token() {
        assert_eq!(format_mac_token(0xb827_eb12_3456), "[b8:27:eb:12:34:56]");
        assert_eq!(format_mac_token(0), "[00:00:00:00:00:00]");
    }

    proptest! {
        #[test]
        fn prop_mac_token_parses_back(mac in 0u64..(1u64 << 48)) {
            let name = format!("host {}", format_mac_token(mac));
            let (host, parsed) = parse_service_name(&name);
            prop_assert_eq!(host, "host");
            prop_assert_eq!(parsed, Some(mac));
        }
    }
}
