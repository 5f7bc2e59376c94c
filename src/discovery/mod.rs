//! Device discovery sweeps.
//!
//! A sweep browses for one service type in one domain for a fixed time,
//! turns each announcement into a [`Device`], then runs the registered
//! post-discovery actions against every device and reports the counts.

pub mod browse;
pub mod device;
pub mod error;
pub mod mdns;
pub mod resolver;
pub mod test_utils;

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::actions::PostDiscoveryAction;
use crate::config::ConfigurationStore;
use crate::session::{SessionConnector, SshConnector};

pub use browse::{BrowseBackend, BrowseEvent, ServiceRecord, format_mac_token, parse_service_name};
pub use device::{Device, DeviceIdentifier, DiscoveryResult, Domain, find_by_mac};
pub use error::DiscoveryError;
pub use mdns::MdnsBrowser;
pub use resolver::{IpResolver, SystemResolver, TableResolver};

/// How often the search loop checks for a stop request.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Phase of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Not started.
    Idle,
    /// Browsing for devices.
    Searching,
    /// Running post-discovery actions.
    CollectingResults,
    /// Finished; results were returned.
    Done,
}

/// Handle that ends a running sweep's search phase early.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests the search to stop. Safe to call more than once.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// Runs discovery sweeps for one identifier and domain.
pub struct DiscoveryOrchestrator {
    identifier: DeviceIdentifier,
    domain: Domain,
    config: ConfigurationStore,
    actions: Vec<PostDiscoveryAction>,
    backend: Box<dyn BrowseBackend>,
    resolver: Box<dyn IpResolver>,
    connector: Box<dyn SessionConnector>,
    state: SweepState,
    stopped: Arc<AtomicBool>,
    devices: Vec<Device>,
}

impl DiscoveryOrchestrator {
    /// Creates an orchestrator that browses with mDNS and connects over SSH.
    #[must_use]
    pub fn new(identifier: DeviceIdentifier, domain: Domain, config: ConfigurationStore) -> Self {
        let connector = SshConnector::new(config.session_options());
        Self::with_backends(
            identifier,
            domain,
            config,
            Box::new(MdnsBrowser::new()),
            Box::new(SystemResolver),
            Box::new(connector),
        )
    }

    /// Creates an orchestrator with explicit browse, resolve and connect
    /// implementations.
    #[must_use]
    pub fn with_backends(
        identifier: DeviceIdentifier,
        domain: Domain,
        config: ConfigurationStore,
        backend: Box<dyn BrowseBackend>,
        resolver: Box<dyn IpResolver>,
        connector: Box<dyn SessionConnector>,
    ) -> Self {
        Self {
            identifier,
            domain,
            config,
            actions: Vec::new(),
            backend,
            resolver,
            connector,
            state: SweepState::Idle,
            stopped: Arc::new(AtomicBool::new(false)),
            devices: Vec::new(),
        }
    }

    /// Appends post-discovery actions. They run in registration order.
    pub fn register_actions(&mut self, actions: impl IntoIterator<Item = PostDiscoveryAction>) {
        for action in actions {
            debug!("Registered action {}", action.identifier());
            self.actions.push(action);
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Returns the devices accepted in the last sweep.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Returns the configuration the sweep reads.
    #[must_use]
    pub fn config(&self) -> &ConfigurationStore {
        &self.config
    }

    /// Returns a handle that stops the search from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stopped: Arc::clone(&self.stopped),
        }
    }

    /// Stops browsing. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.backend.stop();
    }

    /// Browses for `timeout`, then runs the post-discovery actions on every
    /// accepted device.
    ///
    /// Returns one result per device in discovery order.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::BrowseStart`] if browsing cannot begin.
    /// Per-device failures are logged and leave that device's counts empty.
    pub fn run(&mut self, timeout: Duration) -> Result<Vec<DiscoveryResult>, DiscoveryError> {
        self.devices.clear();
        self.stopped.store(false, Ordering::Relaxed);
        self.state = SweepState::Searching;

        info!("Searching for {} in {}", self.identifier, self.domain);
        let events = match self
            .backend
            .start(self.identifier.as_str(), self.domain.value())
        {
            Ok(events) => events,
            Err(e) => {
                error!("Cannot browse for {}: {}", self.identifier, e);
                self.state = SweepState::Idle;
                return Err(e);
            }
        };

        self.collect_devices(&events, timeout);
        self.backend.stop();
        info!("Search finished with {} device(s)", self.devices.len());

        self.state = SweepState::CollectingResults;
        let results = self.run_post_discovery_actions();
        self.state = SweepState::Done;
        Ok(results)
    }

    fn collect_devices(&mut self, events: &Receiver<BrowseEvent>, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut seen = HashSet::new();

        loop {
            if self.stopped.load(Ordering::Relaxed) {
                info!("Search stopped");
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match events.recv_timeout((deadline - now).min(STOP_POLL_INTERVAL)) {
                Ok(event) => self.handle_event(event, &mut seen),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Browse event stream closed");
                    break;
                }
            }
        }
    }

    fn handle_event(&mut self, event: BrowseEvent, seen: &mut HashSet<Ipv4Addr>) {
        match event {
            BrowseEvent::WillSearch => debug!("Browser started"),
            BrowseEvent::Found(record) => {
                if let Some(device) = self.accept(&record, seen) {
                    info!("Found device: {}", device);
                    self.devices.push(device);
                }
            }
            BrowseEvent::Removed(record) => debug!("Service went away: {}", record.name),
            BrowseEvent::Error(message) => warn!("Browse error: {}", message),
        }
    }

    fn accept(&self, record: &ServiceRecord, seen: &mut HashSet<Ipv4Addr>) -> Option<Device> {
        let (hostname, mac) = parse_service_name(&record.name);
        if hostname.is_empty() {
            warn!("Ignoring service with empty name");
            return None;
        }

        let domain = if record.domain.is_empty() {
            self.domain.value()
        } else {
            record.domain.as_str()
        };
        let Some(ip) = self.resolver.resolve(&hostname, domain) else {
            warn!("Dropping {}: no IPv4 address", hostname);
            return None;
        };
        if !seen.insert(ip) {
            debug!("Ignoring duplicate announcement from {} ({})", hostname, ip);
            return None;
        }

        Some(Device::new(
            self.identifier.clone(),
            hostname,
            mac,
            Some(ip),
            self.config.credentials(),
        ))
    }

    fn run_post_discovery_actions(&self) -> Vec<DiscoveryResult> {
        let worker = DeviceWorker {
            config: &self.config,
            actions: &self.actions,
            connector: self.connector.as_ref(),
        };
        let parallelism = self.config.device_parallelism();

        if parallelism <= 1 {
            return self
                .devices
                .iter()
                .map(|device| worker.process(device))
                .collect();
        }

        let mut results = Vec::with_capacity(self.devices.len());
        for batch in self.devices.chunks(parallelism) {
            thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|device| {
                        let worker = &worker;
                        scope.spawn(move || worker.process(device))
                    })
                    .collect();
                for handle in handles {
                    match handle.join() {
                        Ok(result) => results.push(result),
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                }
            });
        }
        results
    }
}

/// Runs the post-discovery actions on one device.
struct DeviceWorker<'a> {
    config: &'a ConfigurationStore,
    actions: &'a [PostDiscoveryAction],
    connector: &'a dyn SessionConnector,
}

impl DeviceWorker<'_> {
    fn process(&self, device: &Device) -> DiscoveryResult {
        if !self.config.run_post_actions() {
            debug!("Post-discovery actions disabled, skipping {}", device.hostname());
            return DiscoveryResult::empty(device.clone());
        }
        info!("Performing post-discovery actions for {}", device.hostname());

        let mut session = if device.username().is_empty() {
            debug!("No username configured, running {} without a session", device.hostname());
            None
        } else {
            let Some(ip) = device.ipv4_address() else {
                warn!("{} has no address, skipping actions", device.hostname());
                return DiscoveryResult::empty(device.clone());
            };
            match self
                .connector
                .connect(&device.credentials(), ip, self.config.port())
            {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Cannot open session to {}: {}", device, e);
                    return DiscoveryResult::empty(device.clone());
                }
            }
        };

        let mut found = BTreeMap::new();
        for action in self.actions {
            let id = action.identifier();
            debug!("Running {} on {}", id, device.hostname());
            match action.run(device, session.as_mut()) {
                Ok(count) => {
                    info!("{}: {} end device(s) via {}", device.hostname(), count, id);
                    found.insert(id, count);
                }
                Err(e) => warn!("{} failed on {}: {}", id, device.hostname(), e),
            }
        }

        if let Some(mut session) = session {
            session.close();
        }
        DiscoveryResult {
            device: device.clone(),
            found_end_devices: found,
        }
    }
}
