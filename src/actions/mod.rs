//! Post-discovery actions.
//!
//! An action inspects one discovered device and reports how many end
//! devices of its kind it found. Actions either run in-process, optionally
//! using the device's remote session, or run as a container on the device.

pub mod builtin;
pub mod docker;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::discovery::{Device, DiscoveryError};
use crate::session::RemoteSession;

pub use builtin::{CommandCountAction, DeploymentAction, DockerProvisionAction};
pub use docker::{DockerAction, DockerOption, decode_count, run_containerized};

/// Name of an action, used as the key of its count in results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionIdentifier(String);

impl ActionIdentifier {
    /// Creates an identifier.
    ///
    /// # Panics
    /// Panics if `name` is empty.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "action identifier must not be empty");
        Self(name)
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An action that runs in-process against one device.
pub trait DeviceAction: Send + Sync {
    /// The action's identifier.
    fn identifier(&self) -> ActionIdentifier;

    /// Inspects `device` and returns the number of end devices found.
    ///
    /// `session` is `None` when no username is configured.
    ///
    /// # Errors
    /// Any error omits this action's count for the device.
    fn run(&self, device: &Device, session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError>;
}

/// An action registered with a sweep.
pub enum PostDiscoveryAction {
    /// Runs in this process.
    InProcess(Box<dyn DeviceAction>),
    /// Runs as a container on the device.
    Containerized(DockerAction),
}

impl PostDiscoveryAction {
    /// Wraps an in-process action.
    #[must_use]
    pub fn in_process(action: impl DeviceAction + 'static) -> Self {
        Self::InProcess(Box::new(action))
    }

    /// Wraps a containerized action.
    #[must_use]
    pub fn containerized(action: DockerAction) -> Self {
        Self::Containerized(action)
    }

    /// The action's identifier.
    #[must_use]
    pub fn identifier(&self) -> ActionIdentifier {
        match self {
            Self::InProcess(action) => action.identifier(),
            Self::Containerized(action) => action.identifier().clone(),
        }
    }

    /// Runs the action on `device`.
    ///
    /// # Errors
    /// A containerized action without a session fails with
    /// [`DiscoveryError::SessionRequired`]; otherwise the action's error.
    pub fn run(
        &self,
        device: &Device,
        session: Option<&mut RemoteSession>,
    ) -> Result<u32, DiscoveryError> {
        match self {
            Self::InProcess(action) => action.run(device, session),
            Self::Containerized(action) => {
                let session = session
                    .ok_or_else(|| DiscoveryError::SessionRequired(action.identifier().clone()))?;
                run_containerized(action, session)
            }
        }
    }
}

impl fmt::Debug for PostDiscoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess(action) => f
                .debug_tuple("InProcess")
                .field(&action.identifier())
                .finish(),
            Self::Containerized(action) => f.debug_tuple("Containerized").field(action).finish(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::discovery::DeviceIdentifier;
    use crate::session::Credentials;

    struct Fixed(u32);

    impl DeviceAction for Fixed {
        fn identifier(&self) -> ActionIdentifier {
            ActionIdentifier::new("fixed")
        }

        fn run(&self, _device: &Device, _session: Option<&mut RemoteSession>) -> Result<u32, DiscoveryError> {
            Ok(self.0)
        }
    }

    fn device() -> Device {
        Device::new(DeviceIdentifier::default(), "pi", None, None, Credentials::default())
    }

    #[test]
    fn test_in_process_runs_without_session() {
        let action = PostDiscoveryAction::in_process(Fixed(3));
        assert_eq!(action.identifier().as_str(), "fixed");
        assert_eq!(action.run(&device(), None).unwrap(), 3);
    }

    #[test]
    fn test_containerized_requires_session() {
        let docker = DockerAction::new(
            ActionIdentifier::new("usb-scan"),
            "scanner:latest",
            "/tmp/usb-scan/result",
            vec![DockerOption::volume("/tmp/usb-scan", "/out")],
        );
        let action = PostDiscoveryAction::containerized(docker);
        let err = action.run(&device(), None).unwrap_err();
        assert!(matches!(err, DiscoveryError::SessionRequired(_)));
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn test_empty_identifier_rejected() {
        let _ = ActionIdentifier::new("");
    }
}
