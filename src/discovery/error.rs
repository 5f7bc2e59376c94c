//! Error types for discovery sweeps and post-discovery actions.

use thiserror::Error;

use crate::actions::ActionIdentifier;
use crate::session::SessionError;

/// Errors raised by a sweep or by an action on one device.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The browse backend could not start.
    #[error("Cannot start service browse: {0}")]
    BrowseStart(String),

    /// A containerized action has no registry credentials.
    #[error("Action {0} has no registry credentials")]
    MissingCredentials(ActionIdentifier),

    /// An action needs a session but the device has none.
    #[error("Action {0} requires a remote session")]
    SessionRequired(ActionIdentifier),

    /// An action's result could not be read as a count.
    #[error("Action {action} produced an unreadable result: {raw:?}")]
    Decode {
        /// Action that ran.
        action: ActionIdentifier,
        /// Raw result text.
        raw: String,
    },

    /// Remote session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Any other action failure.
    #[error("Action {action} failed: {message}")]
    Action {
        /// Action that failed.
        action: ActionIdentifier,
        /// Failure description.
        message: String,
    },
}
