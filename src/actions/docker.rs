//! Containerized post-discovery actions.
//!
//! The image is run on the device with `docker run`; the container writes
//! its count into a file on a mounted volume, which is read back afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::discovery::DiscoveryError;
use crate::session::{RemoteSession, shell_quote};

use super::ActionIdentifier;

/// One `docker run` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerOption {
    /// Run in the background (`-d`).
    Detached,
    /// Give the container extended privileges (`--privileged`).
    Privileged,
    /// Bind mount a host directory (`-v host:container:Z`).
    Volume {
        /// Directory on the device.
        host_dir: String,
        /// Mount point inside the container.
        container_dir: String,
    },
    /// Publish a port (`-p host:container`).
    Port {
        /// Port on the device.
        host: u16,
        /// Port inside the container.
        container: u16,
    },
    /// Registry login used before running.
    Credentials {
        /// Registry username.
        username: String,
        /// Registry password.
        password: String,
    },
    /// Command and arguments passed to the image.
    Command(Vec<String>),
    /// Any other flag, passed through verbatim.
    Custom(String),
}

impl DockerOption {
    /// Creates a volume mount.
    #[must_use]
    pub fn volume(host_dir: impl Into<String>, container_dir: impl Into<String>) -> Self {
        Self::Volume {
            host_dir: host_dir.into(),
            container_dir: container_dir.into(),
        }
    }

    /// Creates registry credentials.
    #[must_use]
    pub fn credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the flag text for options that become `docker run` flags.
    ///
    /// Volume paths are shell quoted; custom flags are passed verbatim.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Detached => Some("-d".to_string()),
            Self::Privileged => Some("--privileged".to_string()),
            Self::Volume {
                host_dir,
                container_dir,
            } => Some(format!(
                "-v {}",
                shell_quote(&format!("{host_dir}:{container_dir}:Z"))
            )),
            Self::Port { host, container } => Some(format!("-p {host}:{container}")),
            Self::Custom(flag) => Some(flag.clone()),
            Self::Credentials { .. } | Self::Command(_) => None,
        }
    }
}

/// A container image run on each device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DockerAction {
    identifier: ActionIdentifier,
    image_name: String,
    result_file: String,
    #[serde(skip)]
    options: Vec<DockerOption>,
}

impl DockerAction {
    /// Creates a containerized action.
    ///
    /// `result_file` is the path on the device where the container leaves
    /// its count, typically inside a mounted volume.
    ///
    /// # Panics
    /// Panics if `options` contains no volume mount, since the result file
    /// could not reach the device otherwise.
    #[must_use]
    pub fn new(
        identifier: ActionIdentifier,
        image_name: impl Into<String>,
        result_file: impl Into<String>,
        options: Vec<DockerOption>,
    ) -> Self {
        assert!(
            options
                .iter()
                .any(|o| matches!(o, DockerOption::Volume { .. })),
            "containerized action {identifier} needs at least one volume mount"
        );
        let image_name = image_name.into();
        let result_file = result_file.into();
        assert!(!image_name.is_empty(), "image name must not be empty");
        assert!(!result_file.is_empty(), "result file must not be empty");
        Self {
            identifier,
            image_name,
            result_file,
            options,
        }
    }

    /// The action's identifier.
    #[must_use]
    pub fn identifier(&self) -> &ActionIdentifier {
        &self.identifier
    }

    /// The image to run.
    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// Path of the result file on the device.
    #[must_use]
    pub fn result_file(&self) -> &str {
        &self.result_file
    }

    /// The configured options.
    #[must_use]
    pub fn options(&self) -> &[DockerOption] {
        &self.options
    }

    /// Returns true if the container is started in the background.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.options.iter().any(|o| matches!(o, DockerOption::Detached))
    }

    /// Registry credentials, if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.options.iter().find_map(|o| match o {
            DockerOption::Credentials { username, password } => {
                Some((username.as_str(), password.as_str()))
            }
            _ => None,
        })
    }

    /// The registry login command, if credentials are configured.
    #[must_use]
    pub fn login_command(&self) -> Option<String> {
        self.credentials().map(|(username, password)| {
            format!(
                "echo {} | sudo docker login --username {} --password-stdin",
                shell_quote(password),
                shell_quote(username)
            )
        })
    }

    /// Builds the arguments that follow `docker run`.
    ///
    /// Detached containers are not started with `--rm`; they are waited on
    /// and removed after they exit.
    #[must_use]
    pub fn run_arguments(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.options.len() + 2);
        if !self.is_detached() {
            args.push("--rm".to_string());
        }
        args.extend(self.options.iter().filter_map(DockerOption::render));
        args.push(shell_quote(&self.image_name));
        for option in &self.options {
            if let DockerOption::Command(command) = option {
                args.extend(command.iter().map(|arg| shell_quote(arg)));
            }
        }
        args
    }

    /// The full run command.
    #[must_use]
    pub fn run_command(&self) -> String {
        format!("sudo docker run {}", self.run_arguments().join(" "))
    }
}

/// Reads a container's result text as a count.
///
/// # Errors
/// Returns [`DiscoveryError::Decode`] if the text is not a non-negative
/// integer.
pub fn decode_count(action: &ActionIdentifier, raw: &str) -> Result<u32, DiscoveryError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| DiscoveryError::Decode {
            action: action.clone(),
            raw: raw.to_string(),
        })
}

/// Runs `action` on the device behind `session` and returns its count.
///
/// Logs in to the registry, prepares a writable result file, runs the
/// container and reads the file back.
///
/// # Errors
/// Returns [`DiscoveryError::MissingCredentials`] without credentials,
/// a session error if a step fails, or a decode error for bad results.
pub fn run_containerized(action: &DockerAction, session: &mut RemoteSession) -> Result<u32, DiscoveryError> {
    let id = action.identifier();
    let login = action
        .login_command()
        .ok_or_else(|| DiscoveryError::MissingCredentials(id.clone()))?;

    debug!("Logging in to registry for {}", id);
    session.execute(&login)?;

    let file = shell_quote(action.result_file());
    session.execute(&format!("sudo touch {file} && sudo chmod 666 {file}"))?;

    info!("Running container {} for {}", action.image_name(), id);
    let started = session.execute(&action.run_command())?;
    if action.is_detached() {
        wait_for_container(id, session, &started)?;
    }

    let raw = session.execute(&format!("cat {file}"))?;
    decode_count(id, &raw)
}

/// Blocks until the detached container whose id `docker run -d` printed
/// has exited, then removes it.
fn wait_for_container(
    id: &ActionIdentifier,
    session: &mut RemoteSession,
    run_output: &str,
) -> Result<(), DiscoveryError> {
    let container = run_output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(|| DiscoveryError::Action {
            action: id.clone(),
            message: "docker run -d printed no container id".to_string(),
        })?;
    let container = shell_quote(container);

    debug!("Waiting for detached container {} of {}", container, id);
    let status = session.execute(&format!("sudo docker wait {container}"))?;
    if status.trim() != "0" {
        debug!("Container of {} exited with status {}", id, status.trim());
    }
    if !session.execute_boolean(&format!("sudo docker rm {container}"))? {
        debug!("Container {} was already removed", container);
    }
    Ok(())
}
