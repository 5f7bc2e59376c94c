//! Integration tests for discovery sweeps.
//!
//! These tests verify that:
//! - Announcements become devices with hostname, MAC and IPv4 filled in
//! - Duplicate and unresolvable announcements are dropped
//! - The search phase honours its timeout and stop requests
//! - Post-discovery actions run per device, in order, with failures isolated

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use device_discovery::actions::{ActionIdentifier, DeviceAction, PostDiscoveryAction};
use device_discovery::config::ConfigurationStore;
use device_discovery::discovery::test_utils::StaticBrowser;
use device_discovery::discovery::{
    BrowseEvent, Device, DeviceIdentifier, DiscoveryError, DiscoveryOrchestrator, Domain,
    ServiceRecord, SweepState, TableResolver,
};
use device_discovery::session::RemoteSession;
use device_discovery::session::test_utils::{Reply, ScriptedChannel, ScriptedConnector};

const PI_1: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 11);
const PI_2: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 12);
const PI_3: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 13);

fn resolver() -> TableResolver {
    TableResolver::new()
        .with("pi-1", PI_1)
        .with("pi-2", PI_2)
        .with("pi-3", PI_3)
}

fn quiet_config() -> ConfigurationStore {
    let mut config = ConfigurationStore::new();
    config.set_run_post_actions(false);
    config
}

fn sweep(
    browser: StaticBrowser,
    config: ConfigurationStore,
    connector: ScriptedConnector,
) -> DiscoveryOrchestrator {
    DiscoveryOrchestrator::with_backends(
        DeviceIdentifier::default(),
        Domain::Local,
        config,
        Box::new(browser),
        Box::new(resolver()),
        Box::new(connector),
    )
}

/// Reports how many times it ran and whether it got a session.
struct SessionProbe;

impl DeviceAction for SessionProbe {
    fn identifier(&self) -> ActionIdentifier {
        ActionIdentifier::new("probe")
    }

    fn run(&self, _device: &Device, session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
        Ok(u32::from(session.is_some()))
    }
}

/// Always fails.
struct Broken;

impl DeviceAction for Broken {
    fn identifier(&self) -> ActionIdentifier {
        ActionIdentifier::new("broken")
    }

    fn run(&self, _device: &Device, _session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
        Err(DiscoveryError::Action {
            action: self.identifier(),
            message: "boom".to_string(),
        })
    }
}

/// Reports a fixed count.
struct Fixed(&'static str, u32);

impl DeviceAction for Fixed {
    fn identifier(&self) -> ActionIdentifier {
        ActionIdentifier::new(self.0)
    }

    fn run(&self, _device: &Device, _session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
        Ok(self.1)
    }
}

// ============================================================================
// Search Phase Tests
// ============================================================================

mod search_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_discovery() {
        let mut orchestrator = DiscoveryOrchestrator::with_backends(
            DeviceIdentifier::new("_dummy._tcp."),
            Domain::Local,
            quiet_config(),
            Box::new(StaticBrowser::new()),
            Box::new(resolver()),
            Box::new(ScriptedConnector::new()),
        );
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        assert!(results.is_empty());
        assert_eq!(orchestrator.state(), SweepState::Done);
    }

    #[test]
    fn test_browse_uses_identifier_and_domain() {
        let browser = StaticBrowser::new();
        let probe = browser.clone();
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(
            probe.starts(),
            vec![("_workstation._tcp.".to_string(), "local.".to_string())]
        );
        assert!(probe.stop_count() >= 1);
    }

    #[test]
    fn test_devices_are_built_from_announcements() {
        let browser = StaticBrowser::new()
            .found("pi-1 [b8:27:eb:00:00:01]")
            .found("pi-2");
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();

        assert_eq!(results.len(), 2);
        let first = &results[0].device;
        assert_eq!(first.hostname(), "pi-1");
        assert_eq!(first.mac_address(), Some(0xb827_eb00_0001));
        assert_eq!(first.ipv4_address(), Some(PI_1));
        assert_eq!(first.identifier(), &DeviceIdentifier::default());

        let second = &results[1].device;
        assert_eq!(second.hostname(), "pi-2");
        assert_eq!(second.mac_address(), None);
        assert_eq!(second.ipv4_address(), Some(PI_2));
        assert!(results.iter().all(|r| r.found_end_devices.is_empty()));
    }

    #[test]
    fn test_duplicate_addresses_are_ignored() {
        let browser = StaticBrowser::new()
            .found("pi-1 [b8:27:eb:00:00:01]")
            .found("pi-1 [b8:27:eb:00:00:01]")
            .found("pi-2");
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(orchestrator.devices().len(), 2);
    }

    #[test]
    fn test_unresolvable_and_removed_services_are_skipped() {
        let browser = StaticBrowser::new()
            .found("laptop [aa:bb:cc:dd:ee:ff]")
            .event(BrowseEvent::Removed(ServiceRecord::new("pi-3", "local.")))
            .event(BrowseEvent::Error("socket hiccup".to_string()))
            .found("pi-1");
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        let hosts: Vec<&str> = results.iter().map(|r| r.device.hostname()).collect();
        assert_eq!(hosts, vec!["pi-1"]);
    }

    #[test]
    fn test_search_honours_timeout() {
        let browser = StaticBrowser::new().found("pi-1").held_open();
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        let started = Instant::now();
        let results = orchestrator.run(Duration::from_millis(300)).unwrap();
        let elapsed = started.elapsed();
        assert_eq!(results.len(), 1);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_handle_ends_search_early() {
        let browser = StaticBrowser::new().found("pi-1").held_open();
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        let handle = orchestrator.stop_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            handle.stop();
        });

        let started = Instant::now();
        let results = orchestrator.run(Duration::from_secs(60)).unwrap();
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_browse_start_failure_is_reported() {
        let browser = StaticBrowser::new().failing("multicast unavailable");
        let mut orchestrator = sweep(browser, quiet_config(), ScriptedConnector::new());
        let err = orchestrator.run(Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("multicast unavailable"));
    }
}

// ============================================================================
// Post-Discovery Tests
// ============================================================================

mod post_discovery_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_with_user() -> ConfigurationStore {
        let mut config = ConfigurationStore::new();
        config.set_username("pi");
        config.set_password("raspberry");
        config.set_port(2222);
        config
    }

    #[test]
    fn test_disabled_actions_open_no_sessions() {
        let connector = ScriptedConnector::new().with_host(PI_1, ScriptedChannel::new());
        let attempts = connector.attempts();
        let mut config = config_with_user();
        config.set_run_post_actions(false);

        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config, connector);
        orchestrator.register_actions([PostDiscoveryAction::in_process(SessionProbe)]);
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].found_end_devices.is_empty());
        assert!(attempts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sessions_use_configured_credentials() {
        let connector = ScriptedConnector::new().with_host(PI_1, ScriptedChannel::new());
        let attempts = connector.attempts();
        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config_with_user(), connector);
        orchestrator.register_actions([PostDiscoveryAction::in_process(SessionProbe)]);

        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(results[0].found_end_devices.get(&ActionIdentifier::new("probe")), Some(&1));

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].address, PI_1);
        assert_eq!(attempts[0].port, 2222);
        assert_eq!(attempts[0].username, "pi");
    }

    #[test]
    fn test_without_username_actions_get_no_session() {
        let mut config = ConfigurationStore::new();
        config.set_run_post_actions(true);
        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config, ScriptedConnector::new());
        orchestrator.register_actions([PostDiscoveryAction::in_process(SessionProbe)]);
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(results[0].found_end_devices.get(&ActionIdentifier::new("probe")), Some(&0));
    }

    #[test]
    fn test_counts_are_recorded_per_action() {
        let connector = ScriptedConnector::new().with_host(PI_1, ScriptedChannel::new());
        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config_with_user(), connector);
        orchestrator.register_actions([
            PostDiscoveryAction::in_process(Fixed("serial", 3)),
            PostDiscoveryAction::in_process(Fixed("camera", 0)),
        ]);
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();

        assert_eq!(results.len(), 1);
        let found: Vec<_> = results[0]
            .found_end_devices
            .iter()
            .map(|(id, count)| (id.as_str().to_string(), *count))
            .collect();
        assert_eq!(found, vec![("camera".to_string(), 0), ("serial".to_string(), 3)]);
    }

    #[test]
    fn test_failing_action_is_isolated() {
        let connector = ScriptedConnector::new().with_host(PI_1, ScriptedChannel::new());
        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config_with_user(), connector);
        orchestrator.register_actions([
            PostDiscoveryAction::in_process(Broken),
            PostDiscoveryAction::in_process(SessionProbe),
        ]);
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        let found = &results[0].found_end_devices;
        assert!(!found.contains_key(&ActionIdentifier::new("broken")));
        assert_eq!(found.get(&ActionIdentifier::new("probe")), Some(&1));
    }

    #[test]
    fn test_unreachable_device_keeps_empty_counts() {
        // Only pi-2 is reachable.
        let connector = ScriptedConnector::new().with_host(PI_2, ScriptedChannel::new());
        let browser = StaticBrowser::new().found("pi-1").found("pi-2");
        let mut orchestrator = sweep(browser, config_with_user(), connector);
        orchestrator.register_actions([PostDiscoveryAction::in_process(SessionProbe)]);

        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].found_end_devices.is_empty());
        assert_eq!(results[1].found_end_devices.len(), 1);
    }

    #[test]
    fn test_sessions_are_closed_after_actions() {
        let script = ScriptedChannel::new();
        let log = script.log();
        let connector = ScriptedConnector::new().with_host(PI_1, script);
        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config_with_user(), connector);
        orchestrator.register_actions([PostDiscoveryAction::in_process(SessionProbe)]);
        orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(log.close_count(), 1);
    }

    #[test]
    fn test_parallel_processing_preserves_order() {
        let connector = ScriptedConnector::new()
            .with_host(PI_1, ScriptedChannel::new())
            .with_host(PI_2, ScriptedChannel::new())
            .with_host(PI_3, ScriptedChannel::new());
        let browser = StaticBrowser::new().found("pi-1").found("pi-2").found("pi-3");
        let mut config = config_with_user();
        config.set_device_parallelism(2);

        let mut orchestrator = sweep(browser, config, connector);
        orchestrator.register_actions([PostDiscoveryAction::in_process(SessionProbe)]);
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();

        let hosts: Vec<&str> = results.iter().map(|r| r.device.hostname()).collect();
        assert_eq!(hosts, vec!["pi-1", "pi-2", "pi-3"]);
        assert!(results.iter().all(|r| r.found_end_devices.len() == 1));
    }

    #[test]
    fn test_count_action_over_session() {
        let script = ScriptedChannel::new().on(
            "ls /dev/ttyUSB*",
            Reply::success("/dev/ttyUSB0\n/dev/ttyUSB1\n"),
        );
        let connector = ScriptedConnector::new().with_host(PI_1, script);
        let mut orchestrator = sweep(StaticBrowser::new().found("pi-1"), config_with_user(), connector);
        orchestrator.register_actions([PostDiscoveryAction::in_process(
            device_discovery::actions::CommandCountAction::new(ActionIdentifier::new("usb"), "ls /dev/ttyUSB*"),
        )]);
        let results = orchestrator.run(Duration::from_secs(1)).unwrap();
        assert_eq!(results[0].found_end_devices.get(&ActionIdentifier::new("usb")), Some(&2));
    }
}
