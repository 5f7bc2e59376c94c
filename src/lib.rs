//! device-discovery
//!
//! Finds devices that advertise an mDNS service on the local network and
//! runs post-discovery actions against each of them over SSH.
//!
//! # Architecture
//!
//! - **Discovery Module**: mDNS browsing, device records, the sweep orchestrator
//! - **Session Module**: long-lived SSH shells with sentinel-framed commands
//! - **Actions Module**: in-process and containerized post-discovery actions
//! - **Config Module**: typed options loaded from ~/.devdisc.toml
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use device_discovery::config::ConfigurationStore;
//! use device_discovery::discovery::{DeviceIdentifier, DiscoveryOrchestrator, Domain};
//!
//! let mut config = ConfigurationStore::new();
//! config.set_run_post_actions(false);
//! let mut sweep = DiscoveryOrchestrator::new(DeviceIdentifier::default(), Domain::Local, config);
//! let results = sweep.run(Duration::from_secs(5)).expect("browse failed");
//! for result in results {
//!     println!("{}", result.device);
//! }
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod actions;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod session;

// Re-export main types
pub use actions::{ActionIdentifier, DeviceAction, DockerAction, DockerOption, PostDiscoveryAction};
pub use config::{ConfigValue, ConfigurationOption, ConfigurationStore};
pub use discovery::{
    Device, DeviceIdentifier, DiscoveryError, DiscoveryOrchestrator, DiscoveryResult, Domain,
    SweepState,
};
pub use session::{Credentials, RemoteSession, SessionError};
