//! Test utilities for remote sessions.
//!
//! Provides an in-memory shell that understands the sentinel framing, so
//! sessions, file operations and actions can be exercised without a host.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::file_ops::ResourceSync;
use super::protocol::ShellChannel;
use super::{Credentials, RemoteSession, SessionConnector, SessionError, SessionOptions, SessionTarget};

/// What the scripted shell does when a command arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Behavior {
    Complete { succeed: bool },
    Hang,
    Disconnect,
    Reset,
}

/// A canned reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    output: String,
    behavior: Behavior,
    chunk_size: Option<usize>,
}

impl Reply {
    /// The command writes `output` and exits with status 0.
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            behavior: Behavior::Complete { succeed: true },
            chunk_size: None,
        }
    }

    /// The command writes `output` and exits with a non-zero status.
    #[must_use]
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            behavior: Behavior::Complete { succeed: false },
            chunk_size: None,
        }
    }

    /// The command never finishes.
    #[must_use]
    pub fn hang() -> Self {
        Self {
            output: String::new(),
            behavior: Behavior::Hang,
            chunk_size: None,
        }
    }

    /// The remote closes the channel (end of stream).
    #[must_use]
    pub fn disconnect() -> Self {
        Self {
            output: String::new(),
            behavior: Behavior::Disconnect,
            chunk_size: None,
        }
    }

    /// Reading from the channel fails with a connection reset.
    #[must_use]
    pub fn reset() -> Self {
        Self {
            output: String::new(),
            behavior: Behavior::Reset,
            chunk_size: None,
        }
    }

    /// Delivers the reply in chunks of `size` bytes.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    #[must_use]
    pub fn in_chunks(mut self, size: usize) -> Self {
        assert!(size > 0, "chunk size must be positive");
        self.chunk_size = Some(size);
        self
    }
}

#[derive(Debug, Default)]
struct LogState {
    commands: Vec<String>,
    closes: usize,
}

/// Shared record of what a scripted shell received.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    state: Arc<Mutex<LogState>>,
}

impl ScriptLog {
    /// Returns the unframed commands in the order they arrived.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    /// Returns how many times the channel was closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.lock().map(|s| s.closes).unwrap_or_default()
    }

    fn record_command(&self, command: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.commands.push(command.to_string());
        }
    }

    fn record_close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closes += 1;
        }
    }
}

/// Fault waiting to be reported by `receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Eof,
    Reset,
}

/// An in-memory shell channel driven by a command script.
///
/// Commands without a rule succeed with no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    exact: HashMap<String, Reply>,
    prefixes: Vec<(String, Reply)>,
    banner: Option<String>,
    echo_input: bool,
    queue: VecDeque<Vec<u8>>,
    fault: Option<Pending>,
    log: ScriptLog,
}

impl ScriptedChannel {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies to exactly `command` with `reply`.
    #[must_use]
    pub fn on(mut self, command: impl Into<String>, reply: Reply) -> Self {
        self.exact.insert(command.into(), reply);
        self
    }

    /// Replies to any command starting with `prefix`.
    #[must_use]
    pub fn on_prefix(mut self, prefix: impl Into<String>, reply: Reply) -> Self {
        self.prefixes.push((prefix.into(), reply));
        self
    }

    /// Emits `banner` as soon as the channel opens.
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        let banner = banner.into();
        self.queue.push_back(banner.clone().into_bytes());
        self.banner = Some(banner);
        self
    }

    /// Echoes every framed command line back, as a terminal would.
    #[must_use]
    pub fn with_input_echo(mut self) -> Self {
        self.echo_input = true;
        self
    }

    /// Returns a handle to the received-command log.
    #[must_use]
    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    /// Returns a fresh channel sharing this script and log.
    #[must_use]
    pub fn spawn(&self) -> Self {
        let mut channel = Self {
            exact: self.exact.clone(),
            prefixes: self.prefixes.clone(),
            banner: self.banner.clone(),
            echo_input: self.echo_input,
            queue: VecDeque::new(),
            fault: None,
            log: self.log.clone(),
        };
        if let Some(banner) = &channel.banner {
            channel.queue.push_back(banner.clone().into_bytes());
        }
        channel
    }

    fn reply_for(&self, command: &str) -> Reply {
        if let Some(reply) = self.exact.get(command) {
            return reply.clone();
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Reply::success(""))
    }

    fn enqueue(&mut self, bytes: Vec<u8>, chunk_size: Option<usize>) {
        match chunk_size {
            Some(size) => {
                for chunk in bytes.chunks(size) {
                    self.queue.push_back(chunk.to_vec());
                }
            }
            None => self.queue.push_back(bytes),
        }
    }
}

/// Splits a framed line into the command and its two sentinels.
fn parse_framed(line: &str) -> Option<(String, String, String)> {
    let line = line.strip_suffix('\n')?;
    let (command, rest) = line.rsplit_once(" && echo ")?;
    let (success, failure) = rest.split_once(" || echo ")?;
    Some((
        command.to_string(),
        success.replace('\'', ""),
        failure.replace('\'', ""),
    ))
}

impl ShellChannel for ScriptedChannel {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(data).into_owned();
        let Some((command, success, failure)) = parse_framed(&text) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unframed input: {text}"),
            ));
        };
        self.log.record_command(&command);

        if self.echo_input {
            self.queue.push_back(text.clone().into_bytes());
        }

        let reply = self.reply_for(&command);
        match reply.behavior {
            Behavior::Complete { succeed } => {
                let token = if succeed { success } else { failure };
                let bytes = format!("{}{}\n", reply.output, token).into_bytes();
                self.enqueue(bytes, reply.chunk_size);
            }
            Behavior::Hang => {
                let bytes = reply.output.into_bytes();
                self.enqueue(bytes, reply.chunk_size);
            }
            Behavior::Disconnect => self.fault = Some(Pending::Eof),
            Behavior::Reset => self.fault = Some(Pending::Reset),
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(mut chunk) = self.queue.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                let rest = chunk.split_off(n);
                self.queue.push_front(rest);
            }
            return Ok(n);
        }
        match self.fault {
            Some(Pending::Eof) => Ok(0),
            Some(Pending::Reset) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no data")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.log.record_close();
        Ok(())
    }
}

/// A connection attempt recorded by [`ScriptedConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    /// Address that was dialled.
    pub address: Ipv4Addr,
    /// Port that was dialled.
    pub port: u16,
    /// Username presented.
    pub username: String,
}

/// A connector that hands out scripted sessions per address.
///
/// Addresses without a script fail with [`SessionError::Connect`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    scripts: HashMap<Ipv4Addr, ScriptedChannel>,
    options: SessionOptions,
    attempts: Arc<Mutex<Vec<ConnectAttempt>>>,
}

impl ScriptedConnector {
    /// Creates a connector with no reachable hosts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `address` reachable, answering with `script`.
    #[must_use]
    pub fn with_host(mut self, address: Ipv4Addr, script: ScriptedChannel) -> Self {
        self.scripts.insert(address, script);
        self
    }

    /// Overrides the session options handed to every session.
    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns a shared handle to the recorded connection attempts.
    #[must_use]
    pub fn attempts(&self) -> Arc<Mutex<Vec<ConnectAttempt>>> {
        Arc::clone(&self.attempts)
    }
}

impl SessionConnector for ScriptedConnector {
    fn connect(
        &self,
        credentials: &Credentials,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<RemoteSession, SessionError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(ConnectAttempt {
                address,
                port,
                username: credentials.username.clone(),
            });
        }
        let script = self
            .scripts
            .get(&address)
            .ok_or_else(|| SessionError::Connect(format!("{address}:{port} unreachable")))?;
        RemoteSession::from_channel(Box::new(script.spawn()), self.options.clone())
    }
}

/// A transfer that copies nothing and records `rsync <local> <remote_dir>`
/// into a [`ScriptLog`], so it shows up in order with the shell commands.
#[derive(Debug, Clone, Default)]
pub struct RecordedSync {
    log: ScriptLog,
    failure: Option<String>,
}

impl RecordedSync {
    /// Records into `log`.
    #[must_use]
    pub fn new(log: ScriptLog) -> Self {
        Self { log, failure: None }
    }

    /// Makes every transfer fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

impl ResourceSync for RecordedSync {
    fn sync(
        &self,
        _target: Option<&SessionTarget>,
        local: &Path,
        remote_dir: &str,
    ) -> Result<String, SessionError> {
        self.log
            .record_command(&format!("rsync {} {}", local.display(), remote_dir));
        match &self.failure {
            Some(message) => Err(SessionError::SyncFailed(message.clone())),
            None => Ok(String::new()),
        }
    }
}
