//! Sentinel framing for commands sent over a long-lived shell channel.
//!
//! Every command is written to the shell as
//! `<command> && echo <success> || echo <failure>`. The reader accumulates
//! output until one of the two sentinel tokens appears at the end of a line.
//! The sentinels are written split by an empty quote pair (`'__DD_O''K_…'`),
//! so the echoed command line never contains the contiguous token.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SessionError;

/// Size of a single read from the channel.
const READ_CHUNK_SIZE: usize = 8192;

/// Back-off used when a non-blocking channel has no data.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// A bidirectional byte stream to a remote shell.
///
/// `receive` follows `Read` conventions: `Ok(0)` is end of stream, and
/// `WouldBlock`/`TimedOut` mean no data arrived yet.
pub trait ShellChannel: Send {
    /// Writes all of `data` to the shell's stdin.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Reads available output into `buf`.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Closes the channel. Must tolerate being called more than once.
    fn close(&mut self) -> io::Result<()>;
}

/// The pair of per-session completion tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    success: String,
    failure: String,
}

impl Sentinels {
    /// Generates sentinels unique to one session.
    #[must_use]
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            success: format!("__DD_OK_{id}__"),
            failure: format!("__DD_FAIL_{id}__"),
        }
    }

    /// Creates sentinels from explicit tokens.
    ///
    /// # Panics
    /// Panics if a token is shorter than two characters, contains a quote or
    /// whitespace, or if both tokens are equal.
    #[must_use]
    pub fn from_tokens(success: impl Into<String>, failure: impl Into<String>) -> Self {
        let success = success.into();
        let failure = failure.into();
        for token in [&success, &failure] {
            assert!(token.len() >= 2, "sentinel token too short: {token}");
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii() && !c.is_ascii_whitespace() && c != '\''),
                "sentinel token must be printable ascii without quotes: {token}"
            );
        }
        assert_ne!(success, failure, "sentinel tokens must differ");
        Self { success, failure }
    }

    /// The token echoed after a command exits with status 0.
    #[must_use]
    pub fn success(&self) -> &str {
        &self.success
    }

    /// The token echoed after a command exits with a non-zero status.
    #[must_use]
    pub fn failure(&self) -> &str {
        &self.failure
    }

    /// Frames `command` for the shell, including the trailing newline.
    #[must_use]
    pub fn wrap(&self, command: &str) -> String {
        format!(
            "{command} && echo {} || echo {}\n",
            split_token(&self.success),
            split_token(&self.failure)
        )
    }
}

/// Writes a token as two quoted halves so it never appears contiguously
/// in the command text.
fn split_token(token: &str) -> String {
    let mid = token.len() / 2;
    format!("'{}''{}'", &token[..mid], &token[mid..])
}

/// Quotes `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=@+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Outcome of scanning the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Success(usize),
    Failure(usize),
}

impl Completion {
    fn index(self) -> usize {
        match self {
            Self::Success(index) | Self::Failure(index) => index,
        }
    }
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence.
/// Invalid bytes elsewhere are left for lossy decoding.
fn utf8_prefix_len(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}

/// Finds the first occurrence of `token` that ends a line.
fn find_line_token(buffer: &[u8], token: &[u8]) -> Option<usize> {
    if buffer.len() <= token.len() {
        return None;
    }
    buffer
        .windows(token.len())
        .enumerate()
        .find(|(index, window)| {
            *window == token && buffer.get(index + token.len()) == Some(&b'\n')
        })
        .map(|(index, _)| index)
}

/// Connection state of a command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChannelState {
    Open,
    Broken(String),
    Closed,
}

/// Runs framed commands one at a time over a [`ShellChannel`].
pub struct CommandChannel {
    channel: Box<dyn ShellChannel>,
    sentinels: Sentinels,
    buffer: Vec<u8>,
    state: ChannelState,
}

impl CommandChannel {
    /// Wraps an already opened shell channel.
    #[must_use]
    pub fn new(channel: Box<dyn ShellChannel>, sentinels: Sentinels) -> Self {
        Self {
            channel,
            sentinels,
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
            state: ChannelState::Open,
        }
    }

    /// Returns the sentinels used by this channel.
    #[must_use]
    pub fn sentinels(&self) -> &Sentinels {
        &self.sentinels
    }

    /// Returns true if commands can still be issued.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Sends `command` and waits for its completion sentinel.
    ///
    /// Returns the text written before the success sentinel. On the failure
    /// sentinel returns [`SessionError::CommandFailed`] carrying the output.
    /// A timeout or channel fault closes the channel.
    pub fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        mut on_chunk: Option<&mut dyn FnMut(&str)>,
    ) -> Result<String, SessionError> {
        match &self.state {
            ChannelState::Open => {}
            ChannelState::Closed => return Err(SessionError::Closed),
            ChannelState::Broken(reason) => return Err(SessionError::Transport(reason.clone())),
        }

        self.buffer.clear();
        let framed = self.sentinels.wrap(command);
        if let Err(e) = self.channel.send(framed.as_bytes()) {
            return Err(self.break_channel(format!("write failed: {e}")));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        // Bytes of `buffer` already handed to `on_chunk`.
        let mut delivered = 0;
        loop {
            if let Some(completion) = self.scan() {
                if let Some(callback) = on_chunk.as_mut() {
                    let end = completion.index();
                    if end > delivered {
                        callback(&String::from_utf8_lossy(&self.buffer[delivered..end]));
                    }
                }
                return self.finish(command, completion);
            }
            if Instant::now() >= deadline {
                warn!("Command timed out after {:?}: {}", timeout, command);
                self.break_channel(format!("timed out waiting for {command}"));
                return Err(SessionError::TimedOut {
                    command: command.to_string(),
                    after: timeout,
                });
            }

            match self.channel.receive(&mut chunk) {
                Ok(0) => return Err(self.break_channel("channel closed by remote".to_string())),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(callback) = on_chunk.as_mut() {
                        let end = self.streamable_end(delivered);
                        if end > delivered {
                            callback(&String::from_utf8_lossy(&self.buffer[delivered..end]));
                            delivered = end;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(IDLE_BACKOFF),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(self.break_channel(format!("read failed: {e}"))),
            }
        }
    }

    /// End of the buffered bytes that can be streamed: holds back a tail
    /// that may still turn into a sentinel and any incomplete UTF-8
    /// sequence.
    fn streamable_end(&self, delivered: usize) -> usize {
        let holdback = self.sentinels.success.len().max(self.sentinels.failure.len());
        let end = self.buffer.len().saturating_sub(holdback);
        if end <= delivered {
            return delivered;
        }
        delivered + utf8_prefix_len(&self.buffer[delivered..end])
    }

    /// Closes the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ChannelState::Open {
            if let Err(e) = self.channel.close() {
                debug!("Error closing shell channel: {}", e);
            }
        }
        self.state = ChannelState::Closed;
    }

    fn scan(&self) -> Option<Completion> {
        let success = find_line_token(&self.buffer, self.sentinels.success.as_bytes());
        let failure = find_line_token(&self.buffer, self.sentinels.failure.as_bytes());
        match (success, failure) {
            (Some(s), Some(f)) if f < s => Some(Completion::Failure(f)),
            (Some(s), _) => Some(Completion::Success(s)),
            (None, Some(f)) => Some(Completion::Failure(f)),
            (None, None) => None,
        }
    }

    fn finish(&mut self, command: &str, completion: Completion) -> Result<String, SessionError> {
        let (index, token_len, succeeded) = match completion {
            Completion::Success(index) => (index, self.sentinels.success.len(), true),
            Completion::Failure(index) => (index, self.sentinels.failure.len(), false),
        };
        let output = String::from_utf8_lossy(&self.buffer[..index]).into_owned();
        let trailing = self.buffer.len() - (index + token_len + 1);
        if trailing > 0 {
            debug!("Discarding {} bytes after sentinel", trailing);
        }
        self.buffer.clear();

        if succeeded {
            Ok(output)
        } else {
            Err(SessionError::CommandFailed {
                command: command.to_string(),
                output,
            })
        }
    }

    fn break_channel(&mut self, reason: String) -> SessionError {
        warn!("Shell channel broken: {}", reason);
        if let Err(e) = self.channel.close() {
            debug!("Error closing broken channel: {}", e);
        }
        self.buffer.clear();
        self.state = ChannelState::Broken(reason.clone());
        SessionError::Transport(reason)
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.close();
    }
}
