//! Command-line arguments for the `devdisc` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::actions::{
    ActionIdentifier, CommandCountAction, DeploymentAction, DockerProvisionAction,
    PostDiscoveryAction,
};
use crate::config::ConfigurationStore;
use crate::discovery::DeviceIdentifier;

/// Discover devices advertising an mDNS service and inspect them over SSH
#[derive(Debug, Parser)]
#[command(name = "devdisc", version)]
pub struct Cli {
    /// Service type to browse for
    #[arg(short = 't', long, default_value = DeviceIdentifier::WORKSTATION)]
    pub service_type: String,

    /// Domain to browse in
    #[arg(short, long, default_value = "local.")]
    pub domain: String,

    /// Seconds to browse before running actions
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// SSH username (no sessions are opened without one)
    #[arg(short, long, env = "DEVDISC_USERNAME")]
    pub username: Option<String>,

    /// SSH password
    #[arg(short, long, env = "DEVDISC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// SSH port
    #[arg(long)]
    pub port: Option<u16>,

    /// Only list devices, skip post-discovery actions
    #[arg(long)]
    pub no_post_actions: bool,

    /// Seconds allowed for each remote command
    #[arg(long)]
    pub command_timeout: Option<u64>,

    /// Number of devices processed at once
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Count output lines of a command on each device (NAME=COMMAND)
    #[arg(long = "count", value_name = "NAME=COMMAND")]
    pub count_commands: Vec<String>,

    /// Install Docker and docker-compose where missing
    #[arg(long)]
    pub provision_docker: bool,

    /// Deploy this local project (with a Dockerfile) to every device
    #[arg(long, value_name = "PATH")]
    pub deploy: Option<PathBuf>,

    /// Remote directory deployments are copied into
    #[arg(long, value_name = "DIR", default_value = crate::actions::builtin::DEFAULT_DEPLOYMENT_DIR)]
    pub deploy_dir: String,

    /// Configuration file (defaults to ~/.devdisc.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write logs to ~/.devdisc/logs/
    #[arg(long)]
    pub log_file: bool,
}

impl Cli {
    /// Browse duration.
    #[must_use]
    pub fn browse_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Config file to read.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(ConfigurationStore::default_path)
    }

    /// Overrides file settings with the flags given on the command line.
    pub fn apply_to(&self, config: &mut ConfigurationStore) {
        if let Some(username) = &self.username {
            config.set_username(username.clone());
        }
        if let Some(password) = &self.password {
            config.set_password(password.clone());
        }
        if let Some(port) = self.port.filter(|p| *p > 0) {
            config.set_port(port);
        }
        if self.no_post_actions {
            config.set_run_post_actions(false);
        }
        if let Some(secs) = self.command_timeout {
            config.set_command_timeout(Duration::from_secs(secs));
        }
        if let Some(parallel) = self.parallel {
            config.set_device_parallelism(parallel);
        }
        if let Some(level) = &self.log_level {
            config.set_log_level(level);
        }
        if self.log_file {
            config.set_log_file(true);
        }
    }

    /// Builds the actions requested on the command line.
    ///
    /// # Errors
    /// Returns a message if a `--count` value is not `NAME=COMMAND`.
    pub fn actions(&self) -> Result<Vec<PostDiscoveryAction>, String> {
        let mut actions = Vec::new();
        if let Some(source) = &self.deploy {
            actions.push(PostDiscoveryAction::in_process(
                DeploymentAction::new(source.clone()).with_remote_dir(self.deploy_dir.clone()),
            ));
        } else if self.provision_docker {
            actions.push(PostDiscoveryAction::in_process(DockerProvisionAction::new()));
        }
        for entry in &self.count_commands {
            let (name, command) = parse_count_flag(entry)?;
            actions.push(PostDiscoveryAction::in_process(CommandCountAction::new(
                ActionIdentifier::new(name),
                command,
            )));
        }
        Ok(actions)
    }
}

/// Splits `NAME=COMMAND`.
fn parse_count_flag(entry: &str) -> Result<(&str, &str), String> {
    match entry.split_once('=') {
        Some((name, command)) if !name.trim().is_empty() && !command.trim().is_empty() => {
            Ok((name.trim(), command.trim()))
        }
        _ => Err(format!("invalid --count value {entry:?}, expected NAME=COMMAND")),
    }
}
