//! File and directory operations on the remote host.
//!
//! All operations run through the session's shell. Mutating commands are
//! prefixed with `sudo ` on Linux hosts.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::SessionError;
use super::protocol::shell_quote;
use super::{RemoteSession, SessionTarget};

/// Mode used for directories created by a resource copy.
const COPY_DIRECTORY_MODE: u32 = 0o777;

/// Platform of the remote host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteOs {
    /// Linux (commands run through sudo).
    #[default]
    Linux,
    /// macOS.
    Mac,
    /// Windows with a POSIX shell.
    Windows,
}

impl RemoteOs {
    /// Prefix prepended to mutating commands.
    #[must_use]
    pub fn command_prefix(self) -> &'static str {
        match self {
            Self::Linux => "sudo ",
            Self::Mac | Self::Windows => "",
        }
    }
}

/// File operations bound to one session.
pub struct RemoteFileOps<'a> {
    session: &'a mut RemoteSession,
    os: RemoteOs,
}

impl<'a> RemoteFileOps<'a> {
    /// Binds file operations to `session`.
    #[must_use]
    pub fn new(session: &'a mut RemoteSession, os: RemoteOs) -> Self {
        Self { session, os }
    }

    fn privileged(&self, command: &str) -> String {
        format!("{}{}", self.os.command_prefix(), command)
    }

    /// Returns true if `path` is a directory on the remote host.
    ///
    /// # Errors
    /// Returns a transport error.
    pub fn directory_exists(&mut self, path: &str) -> Result<bool, SessionError> {
        self.session
            .execute_boolean(&format!("test -d {}", shell_quote(path)))
    }

    /// Creates a directory with octal `mode`.
    ///
    /// With `force_recreate` an existing directory is removed first;
    /// otherwise an existing directory is an error.
    ///
    /// # Errors
    /// Returns [`SessionError::DirectoryExists`] or any command error.
    pub fn create_directory(
        &mut self,
        path: &str,
        mode: u32,
        force_recreate: bool,
    ) -> Result<(), SessionError> {
        assert!(!path.is_empty(), "directory path must not be empty");

        if self.directory_exists(path)? {
            if !force_recreate {
                return Err(SessionError::DirectoryExists(path.to_string()));
            }
            debug!("Recreating existing directory {}", path);
            self.remove(path, true, true)?;
        }

        let command = self.privileged(&format!("mkdir -m {:o} {}", mode, shell_quote(path)));
        self.session.execute(&command)?;
        info!("Created remote directory {}", path);
        Ok(())
    }

    /// Changes the permissions of `path` to octal `mode`.
    ///
    /// # Errors
    /// Returns any command error.
    pub fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), SessionError> {
        let command = self.privileged(&format!("chmod {:o} {}", mode, shell_quote(path)));
        self.session.execute(&command).map(|_| ())
    }

    /// Moves `from` to `to`.
    ///
    /// # Errors
    /// Returns any command error.
    pub fn move_path(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        let command = self.privileged(&format!("mv {} {}", shell_quote(from), shell_quote(to)));
        self.session.execute(&command).map(|_| ())
    }

    /// Removes `path`.
    ///
    /// # Errors
    /// Returns any command error.
    pub fn remove(&mut self, path: &str, recursive: bool, force: bool) -> Result<(), SessionError> {
        assert!(
            !matches!(path.trim(), "" | "/"),
            "refusing to remove {path:?}"
        );
        let command = self.privileged(&remove_command(path, recursive, force));
        self.session.execute(&command).map(|_| ())
    }

    /// Copies `local` into the remote directory `remote_dir` using rsync,
    /// creating the directory first if needed.
    ///
    /// Returns the transfer log printed by rsync.
    ///
    /// # Errors
    /// Returns error if `local` does not exist, the directory cannot be
    /// created, or rsync fails.
    pub fn copy_resources(&mut self, local: &Path, remote_dir: &str) -> Result<String, SessionError> {
        self.copy_resources_with(&Rsync, local, remote_dir)
    }

    /// Same as [`RemoteFileOps::copy_resources`] with an explicit transfer.
    ///
    /// # Errors
    /// Returns error if `local` does not exist, the directory cannot be
    /// created, or the transfer fails.
    pub fn copy_resources_with(
        &mut self,
        sync: &dyn ResourceSync,
        local: &Path,
        remote_dir: &str,
    ) -> Result<String, SessionError> {
        if !local.exists() {
            return Err(SessionError::LocalPathNotFound(local.display().to_string()));
        }
        if !self.directory_exists(remote_dir)? {
            self.create_directory(remote_dir, COPY_DIRECTORY_MODE, false)?;
        }
        sync.sync(self.session.target(), local, remote_dir)
    }
}

/// Copies a local tree to a remote directory outside the shell channel.
pub trait ResourceSync: Send + Sync {
    /// Copies `local` into `remote_dir` on `target`.
    ///
    /// # Errors
    /// Returns [`SessionError::SyncFailed`] if the transfer cannot run or
    /// fails.
    fn sync(
        &self,
        target: Option<&SessionTarget>,
        local: &Path,
        remote_dir: &str,
    ) -> Result<String, SessionError>;
}

/// Transfer through the local `rsync` binary over ssh.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rsync;

impl ResourceSync for Rsync {
    fn sync(
        &self,
        target: Option<&SessionTarget>,
        local: &Path,
        remote_dir: &str,
    ) -> Result<String, SessionError> {
        let target =
            target.ok_or_else(|| SessionError::SyncFailed("session has no SSH target".to_string()))?;

        info!(
            "Copying {} to {}:{}",
            local.display(),
            target.address,
            remote_dir
        );
        let output = rsync_command(target, local, remote_dir).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SessionError::SyncFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Builds the `rm` invocation for `path`.
fn remove_command(path: &str, recursive: bool, force: bool) -> String {
    let flags = match (recursive, force) {
        (true, true) => " -rf",
        (true, false) => " -r",
        (false, true) => " -f",
        (false, false) => "",
    };
    format!("rm{} {}", flags, shell_quote(path))
}

/// Builds the rsync arguments for copying `local` to `target:remote_dir`.
#[must_use]
pub fn rsync_arguments(target: &SessionTarget, local: &Path, remote_dir: &str) -> Vec<String> {
    vec![
        "-avz".to_string(),
        "-e".to_string(),
        format!("ssh -p {} -o StrictHostKeyChecking=no", target.port),
        local.display().to_string(),
        format!(
            "{}@{}:{}",
            target.credentials.username, target.address, remote_dir
        ),
    ]
}

/// Builds the rsync process, wrapped in `sshpass` when a password is set.
fn rsync_command(target: &SessionTarget, local: &Path, remote_dir: &str) -> Command {
    let args = rsync_arguments(target, local, remote_dir);
    if target.credentials.password.is_empty() {
        let mut cmd = Command::new("rsync");
        cmd.args(args);
        cmd
    } else {
        let mut cmd = Command::new("sshpass");
        cmd.arg("-p")
            .arg(&target.credentials.password)
            .arg("rsync")
            .args(args);
        cmd
    }
}
