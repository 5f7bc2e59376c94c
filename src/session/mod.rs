//! Remote command sessions over SSH.
//!
//! A [`RemoteSession`] keeps one interactive shell open per device and runs
//! commands through it one at a time, detecting completion with
//! per-session sentinel tokens.

pub mod error;
pub mod file_ops;
pub mod protocol;
pub mod ssh;
pub mod test_utils;

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, error, info};

pub use error::SessionError;
pub use file_ops::{RemoteFileOps, RemoteOs, ResourceSync, Rsync};
pub use protocol::{CommandChannel, Sentinels, ShellChannel, shell_quote};
pub use ssh::SshShell;

/// Default command that drains the login banner.
const SYNC_COMMAND: &str = "true";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default time allowed for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Username and password used to log in.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password. Never logged.
    pub password: String,
}

impl Credentials {
    /// Creates a new credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Timeouts and platform settings applied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Time allowed to connect and authenticate.
    pub connect_timeout: Duration,
    /// Time allowed for a single command.
    pub command_timeout: Duration,
    /// Remote platform, selects the privilege prefix for file operations.
    pub remote_os: RemoteOs,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            remote_os: RemoteOs::default(),
        }
    }
}

/// Where a session is connected, used by out-of-band transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    /// Login credentials.
    pub credentials: Credentials,
    /// Remote address.
    pub address: Ipv4Addr,
    /// Remote SSH port.
    pub port: u16,
}

/// A long-lived shell on a remote host.
///
/// Only one command is in flight at a time: [`RemoteSession::execute`]
/// takes `&mut self` and returns once the command has completed.
pub struct RemoteSession {
    channel: CommandChannel,
    options: SessionOptions,
    target: Option<SessionTarget>,
}

impl RemoteSession {
    /// Opens an SSH session to `address:port` and drains the login banner.
    ///
    /// # Errors
    /// Returns error if the connection cannot be established or the shell
    /// does not answer the initial synchronisation command.
    pub fn open(
        credentials: &Credentials,
        address: Ipv4Addr,
        port: u16,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let shell = SshShell::open(credentials, address, port, options.connect_timeout)?;
        let mut session = Self::from_channel(Box::new(shell), options)?;
        session.target = Some(SessionTarget {
            credentials: credentials.clone(),
            address,
            port,
        });
        Ok(session)
    }

    /// Wraps an already opened shell channel and drains anything it printed
    /// before the first command.
    ///
    /// # Errors
    /// Returns error if the synchronisation command fails.
    pub fn from_channel(
        channel: Box<dyn ShellChannel>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            channel: CommandChannel::new(channel, Sentinels::generate()),
            options,
            target: None,
        };
        match session.execute(SYNC_COMMAND) {
            Ok(banner) => {
                if !banner.trim().is_empty() {
                    debug!("Discarded login banner ({} bytes)", banner.len());
                }
                Ok(session)
            }
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    /// Runs `command` and returns its output.
    ///
    /// # Errors
    /// Returns [`SessionError::CommandFailed`] if the command exits with a
    /// non-zero status, or a transport error that closes the session.
    pub fn execute(&mut self, command: &str) -> Result<String, SessionError> {
        let timeout = self.options.command_timeout;
        self.channel.execute(command, timeout, None)
    }

    /// Runs `command`, passing output chunks to `on_chunk` as they arrive.
    ///
    /// # Errors
    /// Same as [`RemoteSession::execute`].
    pub fn execute_with(
        &mut self,
        command: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, SessionError> {
        let timeout = self.options.command_timeout;
        self.channel.execute(command, timeout, Some(on_chunk))
    }

    /// Runs `command` and returns its output, treating any failure as fatal.
    ///
    /// # Panics
    /// Panics if the command fails or the session breaks.
    pub fn execute_asserting_success(&mut self, command: &str) -> String {
        match self.execute(command) {
            Ok(output) => output,
            Err(e) => {
                error!("Required command failed: {}: {}", command, e);
                panic!("required remote command failed: {command}: {e}");
            }
        }
    }

    /// Runs `command` and reports whether it exited with status 0.
    ///
    /// # Errors
    /// Returns a transport error. A non-zero exit is `Ok(false)`.
    pub fn execute_boolean(&mut self, command: &str) -> Result<bool, SessionError> {
        match self.execute(command) {
            Ok(_) => Ok(true),
            Err(SessionError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns file operations bound to this session.
    pub fn file_ops(&mut self) -> RemoteFileOps<'_> {
        let os = self.options.remote_os;
        RemoteFileOps::new(self, os)
    }

    /// Returns where this session is connected, if it came from SSH.
    #[must_use]
    pub fn target(&self) -> Option<&SessionTarget> {
        self.target.as_ref()
    }

    /// Returns the options this session runs with.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns true until the session is closed or broken.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Closes the session. Safe to call more than once.
    pub fn close(&mut self) {
        if self.channel.is_open() {
            if let Some(target) = &self.target {
                info!("Closing session to {}", target.address);
            }
        }
        self.channel.close();
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("target", &self.target)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Opens sessions to discovered devices.
pub trait SessionConnector: Send + Sync {
    /// Opens a session to `address:port` with `credentials`.
    ///
    /// # Errors
    /// Returns error if the session cannot be opened.
    fn connect(
        &self,
        credentials: &Credentials,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<RemoteSession, SessionError>;
}

/// Connector that opens real SSH sessions.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SessionOptions,
}

impl SshConnector {
    /// Creates a connector applying `options` to every session.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

impl SessionConnector for SshConnector {
    fn connect(
        &self,
        credentials: &Credentials,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<RemoteSession, SessionError> {
        RemoteSession::open(credentials, address, port, self.options.clone())
    }
}
