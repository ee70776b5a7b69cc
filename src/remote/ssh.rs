use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use ssh2::{Session, Sftp};

use super::{
    CommandError, CommandOutput, ConnectionError, ConnectionTarget, FileInfo, RemoteSession,
    SessionFactory,
};
use crate::model::SshAuth;
use crate::util::shell::redact_env;

/// Opens [SshSession]s using libssh2.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshSessionFactory;

impl SessionFactory for SshSessionFactory {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        SshSession::connect(target).map(|session| Box::new(session) as Box<dyn RemoteSession>)
    }
}

/// SSH session with an SFTP channel opened on connect.
pub struct SshSession {
    session: Session,
    sftp: Sftp,
    host: String,
}

impl SshSession {
    /// Connect and authenticate. Only the connection phase is bounded by
    /// [`ConnectionTarget::timeout`], established sessions block until the
    /// remote side answers.
    pub fn connect(target: &ConnectionTarget) -> Result<Self, ConnectionError> {
        let could_not_connect = |source| ConnectionError::CouldNotConnect {
            host: target.host.clone(),
            port: target.port,
            source,
        };

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(could_not_connect)?
            .next()
            .ok_or_else(|| could_not_connect(io::ErrorKind::NotFound.into()))?;
        log::debug!(target: "remote::ssh", "Connecting to {}:{} ({addr})", target.host, target.port);
        let tcp = TcpStream::connect_timeout(&addr, target.timeout).map_err(could_not_connect)?;

        let handshake = |source| ConnectionError::Handshake {
            host: target.host.clone(),
            source,
        };
        let mut session = Session::new().map_err(handshake)?;
        session.set_timeout(target.timeout.as_millis().try_into().unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(handshake)?;

        let auth_result = match &target.auth {
            SshAuth::Password(password) => {
                session.userauth_password(&target.username, &password.reveal()?)
            }
            SshAuth::PrivateKey { path, passphrase } => {
                let passphrase = passphrase.as_ref().map(|p| p.reveal()).transpose()?;
                session.userauth_pubkey_file(&target.username, None, path, passphrase.as_deref())
            }
        };
        if let Err(e) = auth_result {
            log::debug!(target: "remote::ssh", "Authentication error from {}: {e}", target.host);
        }
        if !session.authenticated() {
            return Err(ConnectionError::AuthenticationRejected {
                username: target.username.clone(),
                host: target.host.clone(),
            });
        }

        let sftp = session.sftp().map_err(|source| ConnectionError::Sftp {
            host: target.host.clone(),
            source,
        })?;
        session.set_timeout(0);
        log::info!(target: "remote::ssh", "Connected to {} as {}", target.host, target.username);

        Ok(Self {
            session,
            sftp,
            host: target.host.clone(),
        })
    }

    fn file_info(path: &str, stat: &ssh2::FileStat) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size: stat.size.unwrap_or(0),
            modified: stat.mtime.map_or(0, |mtime| mtime as i64),
            is_dir: stat.is_dir(),
        }
    }
}

impl RemoteSession for SshSession {
    fn execute(&self, command: &str) -> Result<CommandOutput, CommandError> {
        // environment assignments carry credentials
        let shown = redact_env(command);
        let channel_error = |source| CommandError::Channel {
            command: shown.clone(),
            source,
        };
        log::trace!(target: "remote::ssh", "Running on {}: {shown}", self.host);

        let mut channel = self.session.channel_session().map_err(channel_error)?;
        channel.exec(command).map_err(channel_error)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close().map_err(channel_error)?;
        let exit_status = channel.exit_status().map_err(channel_error)?;

        // relay stderr
        if !stderr.trim().is_empty() {
            log::debug!(target: "remote::ssh", "{}: {}", self.host, stderr.trim_end());
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status,
        })
    }

    fn stat(&self, path: &str) -> Option<FileInfo> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Some(Self::file_info(path, &stat)),
            Err(e) => {
                log::trace!(target: "remote::ssh", "stat {path} on {} failed: {e}", self.host);
                None
            }
        }
    }

    fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>, CommandError> {
        let entries = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|source| CommandError::Channel {
                command: format!("readdir {path}"),
                source,
            })?;

        Ok(entries
            .iter()
            .map(|(entry, stat)| Self::file_info(&entry.to_string_lossy(), stat))
            .collect())
    }

    fn delete(&self, path: &str) -> bool {
        match self.sftp.unlink(Path::new(path)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(target: "remote::ssh", "Deleting {path} on {} failed: {e}", self.host);
                false
            }
        }
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> bool {
        let result = File::open(local_path).and_then(|mut local| {
            let mut remote = self.sftp.create(Path::new(remote_path)).map_err(io::Error::from)?;
            io::copy(&mut local, &mut remote)
        });

        match result {
            Ok(bytes) => {
                log::debug!(target: "remote::ssh", "Uploaded {bytes} bytes to {}:{remote_path}", self.host);
                true
            }
            Err(e) => {
                log::warn!(target: "remote::ssh", "Upload to {}:{remote_path} failed: {e}", self.host);
                false
            }
        }
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        let result = self
            .sftp
            .open(Path::new(remote_path))
            .map_err(io::Error::from)
            .and_then(|mut remote| {
                let mut local = File::create(local_path)?;
                io::copy(&mut remote, &mut local)
            });

        match result {
            Ok(bytes) => {
                log::debug!(target: "remote::ssh", "Downloaded {bytes} bytes from {}:{remote_path}", self.host);
                true
            }
            Err(e) => {
                log::warn!(target: "remote::ssh", "Download of {}:{remote_path} failed: {e}", self.host);
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session.banner().is_some()
    }

    fn is_authenticated(&self) -> bool {
        self.session.authenticated()
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "backup finished", None) {
            log::trace!(target: "remote::ssh", "Disconnect from {} failed: {e}", self.host);
        }
    }
}
