//! Built-in in-process actions.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::discovery::{Device, DiscoveryError};
use crate::session::{RemoteSession, ResourceSync, Rsync, SessionError, shell_quote};

use super::{ActionIdentifier, DeviceAction};

/// Installs Docker with the convenience script.
const INSTALL_DOCKER: &str =
    "curl -fsSL https://get.docker.com -o get-docker.sh && sudo sh get-docker.sh";

/// Installs docker-compose through pip.
const INSTALL_COMPOSE: &str = "sudo pip3 install docker-compose";

/// Counts the non-empty lines a shell command prints.
///
/// A command that exits non-zero counts as zero, so probes like
/// `ls /dev/ttyUSB*` report no devices instead of failing.
#[derive(Debug, Clone)]
pub struct CommandCountAction {
    identifier: ActionIdentifier,
    command: String,
}

impl CommandCountAction {
    /// Creates an action that runs `command` on each device.
    ///
    /// # Panics
    /// Panics if `command` is empty.
    #[must_use]
    pub fn new(identifier: ActionIdentifier, command: impl Into<String>) -> Self {
        let command = command.into();
        assert!(!command.trim().is_empty(), "command must not be empty");
        Self {
            identifier,
            command,
        }
    }

    /// The command run on each device.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Counts lines that contain anything besides whitespace.
#[must_use]
pub fn count_lines(output: &str) -> u32 {
    let count = output.lines().filter(|l| !l.trim().is_empty()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl DeviceAction for CommandCountAction {
    fn identifier(&self) -> ActionIdentifier {
        self.identifier.clone()
    }

    fn run(&self, device: &Device, session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
        let session = session.ok_or_else(|| DiscoveryError::SessionRequired(self.identifier.clone()))?;
        match session.execute(&self.command) {
            Ok(output) => Ok(count_lines(&output)),
            Err(SessionError::CommandFailed { .. }) => {
                debug!("{} found nothing on {}", self.command, device.hostname());
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Makes sure Docker and docker-compose are installed on the device.
///
/// Reports the number of components it had to install. Installation
/// failures are fatal.
#[derive(Debug, Clone)]
pub struct DockerProvisionAction {
    identifier: ActionIdentifier,
    deployment_dir: Option<String>,
}

impl DockerProvisionAction {
    /// Creates the provisioning action.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identifier: ActionIdentifier::new("docker-provision"),
            deployment_dir: None,
        }
    }

    /// Also prepares `dir` as a deployment directory owned by the login user.
    #[must_use]
    pub fn with_deployment_dir(mut self, dir: impl Into<String>) -> Self {
        self.deployment_dir = Some(dir.into());
        self
    }
}

impl Default for DockerProvisionAction {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAction for DockerProvisionAction {
    fn identifier(&self) -> ActionIdentifier {
        self.identifier.clone()
    }

    fn run(&self, device: &Device, session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
        let session = session.ok_or_else(|| DiscoveryError::SessionRequired(self.identifier.clone()))?;
        let mut installed = 0;

        if !session.execute_boolean("docker -v")? {
            info!("Installing Docker on {}", device.hostname());
            session.execute_asserting_success(INSTALL_DOCKER);
            installed += 1;
        }
        if !session.execute_boolean("docker-compose --version")? {
            info!("Installing docker-compose on {}", device.hostname());
            session.execute_asserting_success(INSTALL_COMPOSE);
            installed += 1;
        }

        if let Some(dir) = &self.deployment_dir {
            let mut files = session.file_ops();
            if !files.directory_exists(dir)? {
                files.create_directory(dir, 0o775, false)?;
            }
            let owner = shell_quote(device.username());
            session.execute(&format!("sudo chown {owner}:{owner} {}", shell_quote(dir)))?;
        }

        Ok(installed)
    }
}

/// Default directory deployments are copied into.
pub const DEFAULT_DEPLOYMENT_DIR: &str = "/usr/deployment";

/// Default `host:container` port published by a deployed container.
const DEFAULT_PUBLISH: (u16, u16) = (3000, 3000);

/// Ships a local project with a Dockerfile to each device and runs it.
///
/// Provisions Docker, copies the project into the deployment directory,
/// builds an image tagged `<hostname>.<action>` and replaces the container
/// named after the host. Reports 1 for every device it deployed to.
/// Build and start failures are fatal, like provisioning failures.
pub struct DeploymentAction {
    identifier: ActionIdentifier,
    source: PathBuf,
    remote_dir: String,
    publish: (u16, u16),
    sync: Box<dyn ResourceSync>,
}

impl DeploymentAction {
    /// Deploys the project at `source` into [`DEFAULT_DEPLOYMENT_DIR`].
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            identifier: ActionIdentifier::new("deploy"),
            source: source.into(),
            remote_dir: DEFAULT_DEPLOYMENT_DIR.to_string(),
            publish: DEFAULT_PUBLISH,
            sync: Box::new(Rsync),
        }
    }

    /// Copies into `dir` instead of the default directory.
    #[must_use]
    pub fn with_remote_dir(mut self, dir: impl Into<String>) -> Self {
        self.remote_dir = dir.into();
        self
    }

    /// Publishes `container` on `host` instead of 3000:3000.
    #[must_use]
    pub fn with_published_port(mut self, host: u16, container: u16) -> Self {
        self.publish = (host, container);
        self
    }

    /// Uses `sync` for the file transfer instead of rsync.
    #[must_use]
    pub fn with_sync(mut self, sync: impl ResourceSync + 'static) -> Self {
        self.sync = Box::new(sync);
        self
    }

    /// Local project directory.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    fn remote_source(&self) -> Result<String, DiscoveryError> {
        let folder = self
            .source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DiscoveryError::Action {
                action: self.identifier.clone(),
                message: format!("{} has no directory name", self.source.display()),
            })?;
        Ok(format!("{}/{}", self.remote_dir.trim_end_matches('/'), folder))
    }
}

impl std::fmt::Debug for DeploymentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentAction")
            .field("identifier", &self.identifier)
            .field("source", &self.source)
            .field("remote_dir", &self.remote_dir)
            .field("publish", &self.publish)
            .finish_non_exhaustive()
    }
}

/// Lowercases `raw` and replaces characters Docker rejects in image and
/// container names.
#[must_use]
pub fn docker_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

impl DeviceAction for DeploymentAction {
    fn identifier(&self) -> ActionIdentifier {
        self.identifier.clone()
    }

    fn run(&self, device: &Device, session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
        let session = session.ok_or_else(|| DiscoveryError::SessionRequired(self.identifier.clone()))?;
        let remote_source = self.remote_source()?;
        info!("Deploying {} to {}", self.source.display(), device.hostname());

        DockerProvisionAction::new()
            .with_deployment_dir(self.remote_dir.clone())
            .run(device, Some(&mut *session))?;

        session
            .file_ops()
            .copy_resources_with(self.sync.as_ref(), &self.source, &self.remote_dir)?;

        let container = docker_name(device.hostname());
        let image = docker_name(&format!("{}.{}", device.hostname(), self.identifier));
        session.execute_asserting_success(&format!(
            "sudo docker build -t {} {}",
            shell_quote(&image),
            shell_quote(&remote_source)
        ));

        // Replace any container left over from an earlier deployment.
        let name = shell_quote(&container);
        if !session.execute_boolean(&format!("sudo docker stop {name}"))? {
            debug!("No running container {} on {}", container, device.hostname());
        }
        let _ = session.execute_boolean(&format!("sudo docker rm {name}"))?;

        let (host, port) = self.publish;
        session.execute_asserting_success(&format!(
            "sudo docker run -d -p {host}:{port} --name {name} {}",
            shell_quote(&image)
        ));
        info!("Started {} on {}", image, device.hostname());
        Ok(1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("/dev/ttyUSB0\n/dev/ttyUSB1\n"), 2);
        assert_eq!(count_lines("a\n\n  \nb"), 2);
    }

    #[test]
    #[should_panic(expected = "command must not be empty")]
    fn test_empty_command_rejected() {
        let _ = CommandCountAction::new(ActionIdentifier::new("x"), "  ");
    }

    #[test]
    fn test_docker_name() {
        assert_eq!(docker_name("Pi-01"), "pi-01");
        assert_eq!(docker_name("pi 01.deploy"), "pi-01.deploy");
    }

    #[test]
    fn test_remote_source_uses_folder_name() {
        let action = DeploymentAction::new("/home/me/projects/sensor-hub").with_remote_dir("/srv/apps/");
        assert_eq!(action.remote_source().unwrap(), "/srv/apps/sensor-hub");
    }

    #[test]
    fn test_remote_source_without_folder_name() {
        let action = DeploymentAction::new("/");
        assert!(matches!(
            action.remote_source(),
            Err(DiscoveryError::Action { .. })
        ));
    }

    #[test]
    fn test_provision_identifier() {
        assert_eq!(DockerProvisionAction::new().identifier().as_str(), "docker-provision");
    }
}
