//! Storage destinations artifacts are shipped to.
//!
//! A [Destination] is resolved once per run from the stored
//! [`DestinationKind`] by a [DestinationFactory]:
//!
//! - [LocalDestination]: a directory on another server, reached over SSH.
//! - [ObjectStorageDestination]: an S3 compatible bucket.

mod local;
mod object_storage;

#[cfg(test)]
pub(crate) mod fake;

use std::io;
use std::path::Path;
use std::time::Duration;

use derive_more::{Display, Error, From};

pub use local::LocalDestination;
pub use object_storage::ObjectStorageDestination;

use crate::model::{BackupDestination, DestinationKind, SshAuth};
use crate::remote::{
    CommandError, ConnectionError, ConnectionTarget, RemoteSession, SessionFactory,
};
use crate::store::{StoreError, TaskStore};
use crate::util::retry::RetryPolicy;
use crate::util::secret::UnresolvedSecret;

#[derive(Debug, Display, Error, From)]
/// Errors of destination drivers.
pub enum DestinationError {
    #[from]
    Connection(ConnectionError),
    #[from]
    Command(CommandError),
    #[from]
    Io(io::Error),
    #[from]
    Store(StoreError),
    #[from]
    Secret(UnresolvedSecret),
    /// The artifact could not be fetched from the source server.
    #[display("Downloading {path} from the remote server failed")]
    Download { path: String },
    /// The artifact could not be written to the destination.
    #[display("Writing {target} to the destination failed")]
    Upload { target: String },
    /// The object storage API returned an error.
    #[display("Object storage error: {_0}")]
    ObjectStorage(#[error(ignore)] String),
}

/// An artifact stored at a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: String,
    /// Last modification in seconds since the epoch.
    pub modified: i64,
}

/// Sorts `files` newest first. Equal timestamps fall back to the name,
/// which embeds the creation time for artifacts.
pub fn newest_first(mut files: Vec<StoredFile>) -> Vec<StoredFile> {
    files.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.path.cmp(&a.path))
    });
    files
}

/// A storage backend for artifacts.
pub trait Destination {
    /// Files in scope whose name contains `pattern`, newest first.
    fn list_files(&self, pattern: &str) -> Result<Vec<StoredFile>, DestinationError>;

    /// Deletes `path`. Failures are logged, never returned.
    fn delete_file(&self, path: &str);

    /// Path or key `file_name` is stored at.
    fn full_path(&self, file_name: &str, dest_sub_path: Option<&str>) -> String;

    /// Writes the local file to `target` (as returned by [`Destination::full_path`]).
    fn store(&self, local_path: &Path, target: &str) -> Result<(), DestinationError>;

    /// Copies `remote_source_path` from the source server to the destination.
    ///
    /// The artifact is downloaded into a uniquely named local temp file which
    /// is then stored. Both steps are retried according to `retry`. The temp
    /// file is removed in every case. Returns false once all attempts failed.
    fn stream_files(
        &self,
        session: &dyn RemoteSession,
        remote_source_path: &str,
        file_name: &str,
        dest_sub_path: Option<&str>,
        retry: &RetryPolicy,
    ) -> bool {
        let target = self.full_path(file_name, dest_sub_path);
        let temp = match tempfile::Builder::new()
            .prefix("ssh_backup_")
            .suffix(&format!("_{file_name}"))
            .tempfile()
        {
            Ok(temp) => temp,
            Err(e) => {
                log::error!(target: "destinations", "Creating a local temp file failed: {e}");
                return false;
            }
        };

        let stored = retry.run(&format!("Transfer of {file_name}"), |attempt| {
            log::debug!(target: "destinations", "Transfer of {file_name} to {target}, attempt {attempt}");
            if !session.download(remote_source_path, temp.path()) {
                return Err(DestinationError::Download {
                    path: remote_source_path.to_string(),
                });
            }
            self.store(temp.path(), &target)
        });

        let temp_path = temp.path().to_path_buf();
        if let Err(e) = temp.close() {
            log::warn!(target: "destinations", "Removing temp file {} failed: {e}", temp_path.display());
        }

        stored
    }
}

/// Resolves a stored destination into a driver.
pub trait DestinationFactory: Sync {
    /// Opens a driver whose listings are limited to `scope`.
    fn open(
        &self,
        destination: &BackupDestination,
        scope: Option<&str>,
    ) -> Result<Box<dyn Destination>, DestinationError>;
}

/// Opens the real drivers.
pub struct DriverFactory<'a> {
    pub store: &'a dyn TaskStore,
    pub sessions: &'a dyn SessionFactory,
    pub default_auth: Option<SshAuth>,
    pub connect_timeout: Duration,
}

impl DestinationFactory for DriverFactory<'_> {
    fn open(
        &self,
        destination: &BackupDestination,
        scope: Option<&str>,
    ) -> Result<Box<dyn Destination>, DestinationError> {
        match &destination.kind {
            DestinationKind::Local {
                server_id,
                root_path,
            } => {
                let server = self.store.load_server(*server_id)?;
                let target = ConnectionTarget::resolve(
                    &server,
                    None,
                    self.default_auth.as_ref(),
                    self.connect_timeout,
                )?;
                let session = self.sessions.connect(&target)?;
                log::debug!(target: "destinations", "Opened local destination on {}", server.host);

                Ok(Box::new(LocalDestination::new(session, root_path, scope)))
            }
            DestinationKind::ObjectStorage(config) => {
                Ok(Box::new(ObjectStorageDestination::new(config, scope)?))
            }
        }
    }
}
