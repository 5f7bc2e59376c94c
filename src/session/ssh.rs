//! SSH transport for remote sessions.
//!
//! Opens a password-authenticated ssh2 session and an interactive shell
//! channel with stderr merged into stdout.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use ssh2::{Channel, ExtendedData, Session};
use tracing::{debug, info};

use super::error::SessionError;
use super::protocol::ShellChannel;
use super::Credentials;

/// Read poll interval applied once the shell is open (milliseconds).
const READ_POLL_MS: u32 = 250;

/// A shell channel backed by an ssh2 session.
///
/// Owns the session so the connection lives as long as the channel.
pub struct SshShell {
    session: Session,
    channel: Channel,
    closed: bool,
}

impl SshShell {
    /// Connects to `address:port`, authenticates and opens a shell.
    ///
    /// No pseudo terminal is requested, so the shell does not echo input.
    ///
    /// # Errors
    /// Returns error if `port` is zero, or if connection, handshake,
    /// authentication or channel setup fails. Nothing is left open on failure.
    pub fn open(
        credentials: &Credentials,
        address: Ipv4Addr,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, SessionError> {
        if port == 0 {
            return Err(SessionError::Connect(format!("{address}: port 0 is not a valid SSH port")));
        }

        let addr = SocketAddr::from((address, port));
        debug!("Connecting to {}", addr);
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let mut session = Session::new().map_err(|e| SessionError::Handshake(e.to_string()))?;
        session.set_timeout(duration_millis(connect_timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| SessionError::Handshake(e.to_string()))?;

        session
            .userauth_password(&credentials.username, &credentials.password)
            .map_err(|e| SessionError::Auth(e.to_string()))?;
        if !session.authenticated() {
            return Err(SessionError::Auth(format!(
                "{}@{} rejected",
                credentials.username, address
            )));
        }

        let channel = match open_shell(&session) {
            Ok(channel) => channel,
            Err(e) => {
                let _ = session.disconnect(None, "shell setup failed", None);
                return Err(e);
            }
        };
        session.set_timeout(READ_POLL_MS);

        info!("Opened shell on {}@{}", credentials.username, addr);
        Ok(Self {
            session,
            channel,
            closed: false,
        })
    }
}

fn open_shell(session: &Session) -> Result<Channel, SessionError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| SessionError::Channel(e.to_string()))?;
    let configured = channel
        .handle_extended_data(ExtendedData::Merge)
        .and_then(|()| channel.shell());
    if let Err(e) = configured {
        let _ = channel.close();
        return Err(SessionError::Channel(e.to_string()));
    }
    Ok(channel)
}

fn duration_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

impl ShellChannel for SshShell {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.channel.write_all(data)?;
        self.channel.flush()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.channel.send_eof();
        let _ = self.channel.close();
        self.session
            .disconnect(None, "session closed", None)
            .map_err(io::Error::from)
    }
}
