//! Test utilities for discovery sweeps.
//!
//! Provides a browse backend that replays a fixed list of events.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::browse::{BrowseBackend, BrowseEvent, ServiceRecord};
use super::error::DiscoveryError;

#[derive(Debug, Default)]
struct BrowseLog {
    started: Vec<(String, String)>,
    stops: usize,
}

/// A browse backend that replays scripted events when started.
///
/// By default the event stream closes after the last event, which ends the
/// sweep's search phase early. Use [`StaticBrowser::held_open`] to keep it
/// open until the sweep times out or is stopped.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    events: Vec<BrowseEvent>,
    hold_open: bool,
    start_error: Option<String>,
    sender: Option<Sender<BrowseEvent>>,
    log: Arc<Mutex<BrowseLog>>,
}

impl StaticBrowser {
    /// Creates a browser that finds nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an announcement of a service called `name`.
    #[must_use]
    pub fn found(mut self, name: impl Into<String>) -> Self {
        self.events
            .push(BrowseEvent::Found(ServiceRecord::new(name, "local.")));
        self
    }

    /// Adds an arbitrary event.
    #[must_use]
    pub fn event(mut self, event: BrowseEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Keeps the event stream open after the last event.
    #[must_use]
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Makes `start` fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Returns the `(service_type, domain)` pairs `start` was called with.
    #[must_use]
    pub fn starts(&self) -> Vec<(String, String)> {
        self.log
            .lock()
            .map(|l| l.started.clone())
            .unwrap_or_default()
    }

    /// Returns how many times `stop` was called.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.log.lock().map(|l| l.stops).unwrap_or_default()
    }
}

impl BrowseBackend for StaticBrowser {
    fn start(
        &mut self,
        service_type: &str,
        domain: &str,
    ) -> Result<Receiver<BrowseEvent>, DiscoveryError> {
        if let Ok(mut log) = self.log.lock() {
            log.started
                .push((service_type.to_string(), domain.to_string()));
        }
        if let Some(message) = &self.start_error {
            return Err(DiscoveryError::BrowseStart(message.clone()));
        }

        let (tx, rx) = mpsc::channel();
        let _ = tx.send(BrowseEvent::WillSearch);
        for event in &self.events {
            let _ = tx.send(event.clone());
        }
        if self.hold_open {
            self.sender = Some(tx);
        }
        Ok(rx)
    }

    fn stop(&mut self) {
        self.sender = None;
        if let Ok(mut log) = self.log.lock() {
            log.stops += 1;
        }
    }
}
