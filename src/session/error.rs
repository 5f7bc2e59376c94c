//! Error types for remote sessions.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while opening or using a remote session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// TCP connection failed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// SSH handshake failed.
    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The interactive shell channel could not be opened.
    #[error("Cannot open shell channel: {0}")]
    Channel(String),

    /// The remote command signalled failure through the failure sentinel.
    #[error("Command failed: {command}")]
    CommandFailed {
        /// The command as issued by the caller (without framing).
        command: String,
        /// Everything the command wrote before the failure sentinel.
        output: String,
    },

    /// Channel or connection level fault. The session is closed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No sentinel arrived within the command timeout. The session is closed.
    #[error("Command timed out after {after:?}: {command}")]
    TimedOut {
        /// The command that stalled.
        command: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The session was closed by the caller.
    #[error("Session is closed")]
    Closed,

    /// A directory that must not exist already exists on the remote host.
    #[error("Remote directory already exists: {0}")]
    DirectoryExists(String),

    /// A local path handed to a transfer does not exist.
    #[error("Local path not found: {0}")]
    LocalPathNotFound(String),

    /// The resource sync process failed.
    #[error("Resource sync failed: {0}")]
    SyncFailed(String),

    /// Local I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns true if this error closed the session.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::TimedOut { .. })
    }

    /// Returns the captured output of a failed command.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Connect("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = SessionError::CommandFailed {
            command: "ls /missing".to_string(),
            output: "No such file".to_string(),
        };
        assert!(err.to_string().contains("ls /missing"));
        assert_eq!(err.output(), Some("No such file"));
    }

    #[test]
    fn test_transport_classification() {
        assert!(SessionError::Transport("reset".to_string()).is_transport());
        assert!(
            SessionError::TimedOut {
                command: "sleep 10".to_string(),
                after: Duration::from_secs(1),
            }
            .is_transport()
        );
        assert!(
            !SessionError::CommandFailed {
                command: "false".to_string(),
                output: String::new(),
            }
            .is_transport()
        );
        assert!(!SessionError::Closed.is_transport());
    }
}
