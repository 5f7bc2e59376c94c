//! devdisc - discover devices on the local network.
//!
//! Browses for an mDNS service type, resolves every device that answers,
//! optionally inspects each one over SSH, and prints what it found.
//!
//! Usage: devdisc [OPTIONS]
//!
//! Run `devdisc --help` for the full option list.

use clap::Parser;

use device_discovery::cli::Cli;
use device_discovery::config::ConfigurationStore;
use device_discovery::discovery::{DeviceIdentifier, DiscoveryOrchestrator, DiscoveryResult, Domain};
use device_discovery::logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigurationStore::load(path)?,
        None => ConfigurationStore::load_or_default(&cli.config_path())?,
    };
    cli.apply_to(&mut config);

    logging::init(config.log_config())?;

    let actions = cli.actions()?;
    let mut orchestrator = DiscoveryOrchestrator::new(
        DeviceIdentifier::new(cli.service_type.clone()),
        Domain::parse(&cli.domain),
        config,
    );
    orchestrator.register_actions(actions);

    let results = orchestrator.run(cli.browse_timeout())?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_table(&results);
    }

    Ok(())
}

fn print_table(results: &[DiscoveryResult]) {
    if results.is_empty() {
        println!("No devices found.");
        return;
    }

    println!("{:<24} {:<20} {:<16} ACTIONS", "HOSTNAME", "MAC", "IPV4");
    for result in results {
        let device = &result.device;
        let mac = device
            .mac_address()
            .map(device_discovery::discovery::format_mac_token)
            .unwrap_or_else(|| "-".to_string());
        let ip = device
            .ipv4_address()
            .map_or_else(|| "-".to_string(), |ip| ip.to_string());
        let actions = if result.found_end_devices.is_empty() {
            "-".to_string()
        } else {
            result
                .found_end_devices
                .iter()
                .map(|(id, count)| format!("{id}={count}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("{:<24} {:<20} {:<16} {}", device.hostname(), mac, ip, actions);
    }
}
