//! mDNS browse backend.
//!
//! Runs an `mdns-sd` daemon and forwards its service events, translated to
//! [`BrowseEvent`]s, from a background thread.

use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tracing::{debug, warn};

use super::browse::{BrowseBackend, BrowseEvent, ServiceRecord};
use super::error::DiscoveryError;

/// Joins a service type and domain into the form mdns-sd expects,
/// e.g. `_workstation._tcp.local.`.
#[must_use]
pub fn qualified_service_type(service_type: &str, domain: &str) -> String {
    let service_type = service_type.trim_end_matches('.');
    let domain = domain.trim_matches('.');
    format!("{service_type}.{domain}.")
}

/// Extracts the instance name from a full service name.
#[must_use]
pub fn instance_name(fullname: &str, qualified_type: &str) -> String {
    fullname
        .strip_suffix(qualified_type)
        .map(|rest| rest.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// Browse backend backed by the system's multicast DNS.
#[derive(Default)]
pub struct MdnsBrowser {
    daemon: Option<ServiceDaemon>,
    browsing: Option<String>,
    forwarder: Option<JoinHandle<()>>,
}

impl MdnsBrowser {
    /// Creates an idle browser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BrowseBackend for MdnsBrowser {
    fn start(
        &mut self,
        service_type: &str,
        domain: &str,
    ) -> Result<Receiver<BrowseEvent>, DiscoveryError> {
        self.stop();

        let qualified = qualified_service_type(service_type, domain);
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::BrowseStart(e.to_string()))?;
        let events = daemon
            .browse(&qualified)
            .map_err(|e| DiscoveryError::BrowseStart(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        let domain = domain.to_string();
        let ty = qualified.clone();
        let forwarder = thread::Builder::new()
            .name("mdns-browse".to_string())
            .spawn(move || {
                let mut announced = false;
                while let Ok(event) = events.recv() {
                    let mapped = match event {
                        ServiceEvent::SearchStarted(_) if !announced => {
                            announced = true;
                            BrowseEvent::WillSearch
                        }
                        ServiceEvent::ServiceResolved(info) => BrowseEvent::Found(ServiceRecord::new(
                            instance_name(info.get_fullname(), &ty),
                            domain.clone(),
                        )),
                        ServiceEvent::ServiceRemoved(_, fullname) => BrowseEvent::Removed(
                            ServiceRecord::new(instance_name(&fullname, &ty), domain.clone()),
                        ),
                        ServiceEvent::SearchStopped(_) => break,
                        _ => continue,
                    };
                    if tx.send(mapped).is_err() {
                        break;
                    }
                }
                debug!("mDNS forwarder for {} finished", ty);
            })
            .map_err(|e| DiscoveryError::BrowseStart(e.to_string()))?;

        debug!("Browsing for {}", qualified);
        self.daemon = Some(daemon);
        self.browsing = Some(qualified);
        self.forwarder = Some(forwarder);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            if let Some(ty) = self.browsing.take() {
                if let Err(e) = daemon.stop_browse(&ty) {
                    debug!("stop_browse({}) failed: {}", ty, e);
                }
            }
            if let Err(e) = daemon.shutdown() {
                warn!("mDNS daemon shutdown failed: {}", e);
            }
        }
        if let Some(handle) = self.forwarder.take() {
            if handle.join().is_err() {
                warn!("mDNS forwarder thread panicked");
            }
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_service_type() {
        assert_eq!(
            qualified_service_type("_workstation._tcp.", "local."),
            "_workstation._tcp.local."
        );
        assert_eq!(
            qualified_service_type("_workstation._tcp", "local"),
            "_workstation._tcp.local."
        );
    }

    #[test]
    fn test_instance_name() {
        let ty = "_workstation._tcp.local.";
        assert_eq!(
            instance_name("pi-01 [b8:27:eb:12:34:56]._workstation._tcp.local.", ty),
            "pi-01 [b8:27:eb:12:34:56]"
        );
        assert_eq!(instance_name("odd-name", ty), "odd-name");
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut browser = MdnsBrowser::new();
        browser.stop();
        browser.stop();
    }
}
