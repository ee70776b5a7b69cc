//! Authenticated SSH/SFTP sessions to remote servers.
//!
//! The engine only talks to remote hosts through the [`RemoteSession`] trait.
//! Sessions are opened by a [`SessionFactory`], which lets tests hand out
//! scripted sessions instead of real connections.

pub mod diagnostics;
mod ssh;

#[cfg(test)]
pub(crate) mod fake;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::model::{RemoteServer, SshAuth};
use crate::util::secret::{Secret, UnresolvedSecret};

pub use diagnostics::{DatabaseEngine, Diagnostics, DiagnosticsError};
pub use ssh::{SshSession, SshSessionFactory};

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    pub timeout: Duration,
}

impl ConnectionTarget {
    /// Build a target for `server`, resolving the authentication material
    /// from the task override, the server and the system default in that order.
    pub fn resolve(
        server: &RemoteServer,
        task_auth: Option<&SshAuth>,
        default_auth: Option<&SshAuth>,
        timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let auth = task_auth
            .or(server.ssh_auth.as_ref())
            .or(default_auth)
            .cloned()
            .ok_or_else(|| ConnectionError::NoCredentials {
                host: server.host.clone(),
            })?;

        Ok(Self {
            host: server.host.clone(),
            port: server.port,
            username: server.username.clone(),
            auth,
            timeout,
        })
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors on establishing a session.
pub enum ConnectionError {
    /// TCP connection could not be established.
    #[display("Could not connect to {host}:{port}: {source}")]
    CouldNotConnect {
        host: String,
        port: u16,
        source: io::Error,
    },
    /// SSH handshake failed.
    #[display("SSH handshake with {host} failed: {source}")]
    Handshake { host: String, source: ssh2::Error },
    /// Credentials were rejected by the server.
    #[display("Authentication as {username}@{host} was rejected")]
    AuthenticationRejected { username: String, host: String },
    /// Neither task, server nor system provide authentication material.
    #[display("No SSH credentials configured for {host}")]
    NoCredentials { host: String },
    /// A stored secret could not be resolved.
    #[from]
    Secret(UnresolvedSecret),
    /// The SFTP subsystem could not be started.
    #[display("SFTP subsystem unavailable on {host}: {source}")]
    Sftp { host: String, source: ssh2::Error },
}

#[derive(Debug, Display, Error, From)]
/// Errors on executing a remote command.
pub enum CommandError {
    /// The exec channel failed.
    #[display("Executing `{command}` failed: {source}")]
    Channel {
        command: String,
        source: ssh2::Error,
    },
    /// Reading the command output failed.
    #[from]
    Io(io::Error),
    /// The command returned a non-zero exit status.
    #[display("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    /// The command output could not be interpreted.
    #[display("Unexpected output of `{command}`: {output}")]
    Unparsable { command: String, output: String },
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Metadata of a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    /// Modification time in seconds since the epoch.
    pub modified: i64,
    pub is_dir: bool,
}

impl FileInfo {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// An authenticated SSH/SFTP session.
///
/// File operations report failure through their return value, only command
/// execution and directory listings carry an error.
pub trait RemoteSession {
    /// Execute `command` and capture its output, whatever its exit status.
    fn execute(&self, command: &str) -> Result<CommandOutput, CommandError>;

    /// Metadata of `path`, [None] if it can't be stat'ed.
    fn stat(&self, path: &str) -> Option<FileInfo>;

    /// Entries of the directory at `path`.
    fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, CommandError>;

    fn delete(&self, path: &str) -> bool;

    fn upload(&self, local_path: &Path, remote_path: &str) -> bool;

    fn download(&self, remote_path: &str, local_path: &Path) -> bool;

    fn is_connected(&self) -> bool;

    fn is_authenticated(&self) -> bool;

    /// Execute `command` and return its stdout, failing on a non-zero exit status.
    fn run(&self, command: &str) -> Result<String, CommandError> {
        let output = self.execute(command)?;
        if !output.success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                status: output.exit_status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// Opens sessions.
pub trait SessionFactory: Sync {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>, ConnectionError>;
}

/// System wide default authentication material.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SshDefaults {
    /// Private key used when neither task nor server configure credentials.
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<Secret>,
}

impl SshDefaults {
    pub fn auth(&self) -> Option<SshAuth> {
        self.private_key.as_ref().map(|path| SshAuth::PrivateKey {
            path: path.clone(),
            passphrase: self.passphrase.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(auth: Option<SshAuth>) -> RemoteServer {
        RemoteServer {
            id: 1,
            host: "example.org".into(),
            port: 2222,
            username: "deploy".into(),
            ssh_auth: auth,
            database_username: None,
            database_password: None,
            connectivity_status: Default::default(),
            last_connected_at: None,
        }
    }

    fn key(path: &str) -> SshAuth {
        SshAuth::PrivateKey {
            path: path.into(),
            passphrase: None,
        }
    }

    #[test]
    fn auth_resolution_order() {
        let timeout = Duration::from_secs(10);
        let task = SshAuth::Password(Secret::new("task"));
        let default = key("/etc/ssh_backup/id_ed25519");

        let target =
            ConnectionTarget::resolve(&server(Some(key("/srv"))), Some(&task), Some(&default), timeout)
                .unwrap();
        assert_eq!(target.auth, task);
        assert_eq!(target.port, 2222);

        let target =
            ConnectionTarget::resolve(&server(Some(key("/srv"))), None, Some(&default), timeout)
                .unwrap();
        assert_eq!(target.auth, key("/srv"));

        let target = ConnectionTarget::resolve(&server(None), None, Some(&default), timeout).unwrap();
        assert_eq!(target.auth, default);

        let err = ConnectionTarget::resolve(&server(None), None, None, timeout).unwrap_err();
        assert!(matches!(err, ConnectionError::NoCredentials { .. }));
    }

    #[test]
    fn combined_output() {
        let output = CommandOutput {
            stdout: "adding: a\n".into(),
            stderr: "warning: b\n".into(),
            exit_status: 0,
        };
        assert_eq!(output.combined(), "adding: a\nwarning: b");
    }
}
